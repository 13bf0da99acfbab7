//! Immutable, content-addressed definitions consumed by every world.
//!
//! A [`CatalogBundle`] holds blocks, items, recipes, blueprints, law templates,
//! event templates, and tuning constants. Each section carries a sha256 digest
//! of its canonical JSON so clients can detect catalog drift from WELCOME alone.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use contracts::{CatalogDigests, DigestRef, ItemStack};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::geom::{rotate_offset, Vec3};

pub const AIR: &str = "AIR";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDef {
    pub id: String,
    #[serde(default = "default_true")]
    pub solid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_family: Option<String>,
    /// Item dropped when mined; defaults to the block id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drops: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edible {
    pub hp: i32,
    pub hunger: i32,
    pub stamina_milli: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDef {
    pub family: String,
    pub tier: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edible: Option<Edible>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolDef>,
    #[serde(default = "default_value")]
    pub value: u32,
}

fn default_value() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeDef {
    pub recipe_id: String,
    /// `HAND`, `CRAFTING_BENCH`, or `FURNACE`.
    pub station: String,
    pub inputs: Vec<ItemStack>,
    pub outputs: Vec<ItemStack>,
    pub time_ticks: u64,
    #[serde(default = "default_tier")]
    pub tier: u8,
}

fn default_tier() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintBlock {
    pub pos: [i32; 3],
    pub block: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintDef {
    pub id: String,
    pub blocks: Vec<BlueprintBlock>,
    #[serde(default)]
    pub cost: Vec<ItemStack>,
    /// When set, completion also requires every block to be supported.
    #[serde(default)]
    pub require_support: bool,
}

impl BlueprintDef {
    /// World positions and block ids after rotating around `anchor`.
    pub fn placements(&self, anchor: Vec3, rotation: i32) -> Vec<(Vec3, &str)> {
        self.blocks
            .iter()
            .map(|block| {
                let offset = rotate_offset(Vec3::from_array(block.pos), rotation);
                (
                    Vec3::new(anchor.x + offset.x, anchor.y + offset.y, anchor.z + offset.z),
                    block.block.as_str(),
                )
            })
            .collect()
    }

    pub fn complexity(&self) -> usize {
        let mut kinds = self
            .blocks
            .iter()
            .map(|block| block.block.as_str())
            .collect::<Vec<_>>();
        kinds.sort_unstable();
        kinds.dedup();
        kinds.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LawTemplateDef {
    pub id: String,
    pub title: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventTemplateDef {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Base sampling weight in permille.
    pub base_weight: u64,
    pub duration_ticks: u64,
    pub radius: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tuning {
    /// Mining work ticks by tool tier `none, wood, stone, iron`.
    pub mine_work_ticks: [u64; 4],
    /// Stamina milli spent per mining tick by tier.
    pub mine_stamina_milli: [i32; 4],
    pub move_stamina_milli: i32,
    pub spawn_spacing: i32,
    pub interact_range: i32,
    pub station_range: i32,
    pub item_entity_ttl_ticks: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            mine_work_ticks: [10, 8, 6, 4],
            mine_stamina_milli: [15, 13, 11, 9],
            move_stamina_milli: 8,
            spawn_spacing: 2,
            interact_range: 3,
            station_range: 2,
            item_entity_ttl_ticks: 6000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogBundle {
    palette: Vec<BlockDef>,
    block_index: BTreeMap<String, u16>,
    pub items: BTreeMap<String, ItemDef>,
    pub recipes: BTreeMap<String, RecipeDef>,
    smelt_by_input: BTreeMap<String, String>,
    pub blueprints: BTreeMap<String, BlueprintDef>,
    pub law_templates: BTreeMap<String, LawTemplateDef>,
    pub events: BTreeMap<String, EventTemplateDef>,
    pub tuning: Tuning,
    digests: CatalogDigests,
}

impl CatalogBundle {
    pub fn builtin() -> Self {
        Self::from_sections(
            builtin_blocks(),
            builtin_items(),
            builtin_recipes(),
            builtin_blueprints(),
            builtin_law_templates(),
            builtin_events(),
            Tuning::default(),
        )
    }

    /// Reads JSON sections from `dir`; a missing file falls back to the built-in section.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let blocks = read_section(dir, "blocks.json")?.unwrap_or_else(builtin_blocks);
        let items = read_section(dir, "items.json")?.unwrap_or_else(builtin_items);
        let recipes = read_section(dir, "recipes.json")?.unwrap_or_else(builtin_recipes);
        let blueprints = read_section(dir, "blueprints.json")?.unwrap_or_else(builtin_blueprints);
        let laws = read_section(dir, "law_templates.json")?.unwrap_or_else(builtin_law_templates);
        let events = read_section(dir, "events.json")?.unwrap_or_else(builtin_events);
        let tuning = read_section(dir, "tuning.json")?.unwrap_or_default();
        let bundle = Self::from_sections(blocks, items, recipes, blueprints, laws, events, tuning);
        bundle.validate()?;
        Ok(bundle)
    }

    fn from_sections(
        mut blocks: Vec<BlockDef>,
        items: Vec<ItemDef>,
        recipes: Vec<RecipeDef>,
        blueprints: Vec<BlueprintDef>,
        law_templates: Vec<LawTemplateDef>,
        events: Vec<EventTemplateDef>,
        tuning: Tuning,
    ) -> Self {
        blocks.retain(|block| block.id != AIR);
        blocks.sort_by(|a, b| a.id.cmp(&b.id));
        blocks.dedup_by(|a, b| a.id == b.id);
        blocks.insert(
            0,
            BlockDef {
                id: AIR.to_string(),
                solid: false,
                tool_family: None,
                drops: None,
            },
        );
        let block_index = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (block.id.clone(), index as u16))
            .collect::<BTreeMap<_, _>>();

        let items = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect::<BTreeMap<_, _>>();
        let recipes = recipes
            .into_iter()
            .map(|recipe| (recipe.recipe_id.clone(), recipe))
            .collect::<BTreeMap<_, _>>();
        let smelt_by_input = recipes
            .values()
            .filter(|recipe| recipe.station == "FURNACE")
            .filter_map(|recipe| {
                recipe
                    .inputs
                    .iter()
                    .find(|input| input.item != "COAL")
                    .map(|input| (input.item.clone(), recipe.recipe_id.clone()))
            })
            .collect::<BTreeMap<_, _>>();
        let blueprints = blueprints
            .into_iter()
            .map(|bp| (bp.id.clone(), bp))
            .collect::<BTreeMap<_, _>>();
        let law_templates = law_templates
            .into_iter()
            .map(|law| (law.id.clone(), law))
            .collect::<BTreeMap<_, _>>();
        let events = events
            .into_iter()
            .map(|event| (event.id.clone(), event))
            .collect::<BTreeMap<_, _>>();

        let digests = CatalogDigests {
            block_palette: section_digest(&blocks, blocks.len()),
            item_palette: section_digest(&items, items.len()),
            recipes: section_digest(&recipes, recipes.len()),
            blueprints: section_digest(&blueprints, blueprints.len()),
            law_templates: section_digest(&law_templates, law_templates.len()),
            events: section_digest(&events, events.len()),
            tuning: section_digest(&tuning, 1),
        };

        Self {
            palette: blocks,
            block_index,
            items,
            recipes,
            smelt_by_input,
            blueprints,
            law_templates,
            events,
            tuning,
            digests,
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for item in self.items.values() {
            if let Some(place_as) = &item.place_as {
                if !self.block_index.contains_key(place_as) {
                    return Err(CatalogError::Invalid(format!(
                        "item {} places unknown block {place_as}",
                        item.id
                    )));
                }
            }
        }
        for blueprint in self.blueprints.values() {
            for block in &blueprint.blocks {
                if !self.block_index.contains_key(&block.block) {
                    return Err(CatalogError::Invalid(format!(
                        "blueprint {} uses unknown block {}",
                        blueprint.id, block.block
                    )));
                }
            }
        }
        if self.palette.len() > usize::from(u16::MAX) {
            return Err(CatalogError::Invalid("block palette too large".to_string()));
        }
        Ok(())
    }

    pub fn digests(&self) -> &CatalogDigests {
        &self.digests
    }

    pub fn palette(&self) -> &[BlockDef] {
        &self.palette
    }

    pub fn block_id(&self, name: &str) -> Option<u16> {
        self.block_index.get(name).copied()
    }

    /// Index for `name`, or AIR when unknown.
    pub fn block_or_air(&self, name: &str) -> u16 {
        self.block_id(name).unwrap_or(0)
    }

    pub fn block_name(&self, id: u16) -> &str {
        self.palette
            .get(usize::from(id))
            .map(|block| block.id.as_str())
            .unwrap_or(AIR)
    }

    pub fn block_def(&self, id: u16) -> Option<&BlockDef> {
        self.palette.get(usize::from(id))
    }

    pub fn is_solid(&self, id: u16) -> bool {
        self.block_def(id).map(|block| block.solid).unwrap_or(false)
    }

    pub fn item(&self, id: &str) -> Option<&ItemDef> {
        self.items.get(id)
    }

    pub fn item_value(&self, id: &str) -> u64 {
        self.items
            .get(id)
            .map(|item| u64::from(item.value))
            .unwrap_or(1)
    }

    pub fn smelt_recipe_for(&self, input: &str) -> Option<&RecipeDef> {
        self.smelt_by_input
            .get(input)
            .and_then(|recipe_id| self.recipes.get(recipe_id))
    }

    /// Item produced by mining `block`.
    pub fn drop_for(&self, block: u16) -> Option<String> {
        let def = self.block_def(block)?;
        if def.id == AIR {
            return None;
        }
        Some(def.drops.clone().unwrap_or_else(|| def.id.clone()))
    }
}

fn read_section<T: serde::de::DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<Option<T>, CatalogError> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn section_digest<T: Serialize>(section: &T, count: usize) -> DigestRef {
    let bytes = serde_json::to_vec(section).unwrap_or_default();
    DigestRef {
        digest: hex::encode(Sha256::digest(&bytes)),
        count,
    }
}

fn block(id: &str, solid: bool, tool_family: Option<&str>, drops: Option<&str>) -> BlockDef {
    BlockDef {
        id: id.to_string(),
        solid,
        tool_family: tool_family.map(str::to_string),
        drops: drops.map(str::to_string),
    }
}

const PLACEABLE_BLOCKS: [&str; 22] = [
    "STONE",
    "DIRT",
    "SAND",
    "GRAVEL",
    "LOG",
    "PLANK",
    "BRICK",
    "GLASS",
    "WIRE",
    "SIGN",
    "TORCH",
    "CONVEYOR",
    "SWITCH",
    "SENSOR",
    "CHEST",
    "FURNACE",
    "CRAFTING_BENCH",
    "CONTRACT_TERMINAL",
    "BULLETIN_BOARD",
    "CLAIM_TOTEM",
    "BATTERY",
    "CRYSTAL_ORE",
];

fn builtin_blocks() -> Vec<BlockDef> {
    let pick = Some("pickaxe");
    vec![
        block("STONE", true, pick, None),
        block("DIRT", true, None, None),
        block("SAND", true, None, None),
        block("GRAVEL", true, None, None),
        block("LOG", true, None, None),
        block("PLANK", true, None, None),
        block("BRICK", true, pick, None),
        block("GLASS", true, None, None),
        block("COAL_ORE", true, pick, Some("COAL")),
        block("IRON_ORE", true, pick, None),
        block("COPPER_ORE", true, pick, None),
        block("CRYSTAL_ORE", true, pick, Some("CRYSTAL_SHARD")),
        block("WIRE", false, None, None),
        block("SIGN", false, None, None),
        block("TORCH", false, None, None),
        block("CONVEYOR", false, None, None),
        block("SWITCH", false, None, None),
        block("SENSOR", false, None, None),
        block("CHEST", true, None, None),
        block("FURNACE", true, pick, None),
        block("CRAFTING_BENCH", true, None, None),
        block("CONTRACT_TERMINAL", true, pick, None),
        block("BULLETIN_BOARD", true, None, None),
        block("CLAIM_TOTEM", true, pick, None),
        block("BATTERY", true, None, None),
    ]
}

fn item(id: &str, value: u32) -> ItemDef {
    ItemDef {
        id: id.to_string(),
        place_as: None,
        edible: None,
        tool: None,
        value,
    }
}

fn builtin_items() -> Vec<ItemDef> {
    let values: BTreeMap<&str, u32> = [
        ("PLANK", 1),
        ("LOG", 2),
        ("STONE", 1),
        ("COAL", 2),
        ("COAL_ORE", 3),
        ("IRON_ORE", 3),
        ("COPPER_ORE", 3),
        ("CRYSTAL_ORE", 3),
        ("IRON_INGOT", 5),
        ("COPPER_INGOT", 4),
        ("CRYSTAL_SHARD", 20),
        ("WIRE", 1),
        ("BATTERY", 30),
        ("CONVEYOR", 36),
        ("SENSOR", 52),
        ("CLAIM_TOTEM", 26),
        ("CONTRACT_TERMINAL", 80),
        ("BERRIES", 1),
        ("BREAD", 3),
        ("RAW_MEAT", 1),
        ("COOKED_MEAT", 5),
    ]
    .into_iter()
    .collect();
    let value_of = |id: &str| values.get(id).copied().unwrap_or(1);

    let mut items = Vec::new();
    for id in PLACEABLE_BLOCKS {
        let mut def = item(id, value_of(id));
        def.place_as = Some(id.to_string());
        items.push(def);
    }
    for id in ["IRON_ORE", "COPPER_ORE", "COAL_ORE"] {
        let mut def = item(id, value_of(id));
        def.place_as = Some(id.to_string());
        items.push(def);
    }
    for id in [
        "COAL",
        "IRON_INGOT",
        "COPPER_INGOT",
        "CRYSTAL_SHARD",
        "STICK",
        "METAL_PLATE",
    ] {
        items.push(item(id, value_of(id)));
    }
    for (id, hp, hunger, stamina_milli) in [
        ("BERRIES", 0, 2, 50),
        ("BREAD", 1, 6, 150),
        ("RAW_MEAT", 0, 3, 50),
        ("COOKED_MEAT", 2, 8, 200),
    ] {
        let mut def = item(id, value_of(id));
        def.edible = Some(Edible {
            hp,
            hunger,
            stamina_milli,
        });
        items.push(def);
    }
    for (id, tier) in [("WOOD_PICKAXE", 1), ("STONE_PICKAXE", 2), ("IRON_PICKAXE", 3)] {
        let mut def = item(id, 2 + u32::from(tier) * 3);
        def.tool = Some(ToolDef {
            family: "pickaxe".to_string(),
            tier,
        });
        items.push(def);
    }
    items
}

fn stacks(raw: &[(&str, u32)]) -> Vec<ItemStack> {
    raw.iter()
        .map(|(item, count)| ItemStack::new(*item, *count))
        .collect()
}

fn recipe(
    id: &str,
    station: &str,
    inputs: &[(&str, u32)],
    outputs: &[(&str, u32)],
    time_ticks: u64,
    tier: u8,
) -> RecipeDef {
    RecipeDef {
        recipe_id: id.to_string(),
        station: station.to_string(),
        inputs: stacks(inputs),
        outputs: stacks(outputs),
        time_ticks,
        tier,
    }
}

fn builtin_recipes() -> Vec<RecipeDef> {
    let bench = "CRAFTING_BENCH";
    vec![
        recipe("plank", "HAND", &[("LOG", 1)], &[("PLANK", 4)], 2, 1),
        recipe("stick", "HAND", &[("PLANK", 2)], &[("STICK", 4)], 2, 1),
        recipe("crafting_bench", "HAND", &[("PLANK", 4)], &[("CRAFTING_BENCH", 1)], 5, 1),
        recipe("chest", bench, &[("PLANK", 8)], &[("CHEST", 1)], 5, 1),
        recipe("furnace", bench, &[("STONE", 8)], &[("FURNACE", 1)], 5, 1),
        recipe("torch", "HAND", &[("STICK", 1), ("COAL", 1)], &[("TORCH", 4)], 2, 1),
        recipe("sign", bench, &[("PLANK", 6), ("STICK", 1)], &[("SIGN", 1)], 3, 1),
        recipe(
            "bulletin_board",
            bench,
            &[("PLANK", 6), ("STICK", 2)],
            &[("BULLETIN_BOARD", 1)],
            4,
            1,
        ),
        recipe("wire", bench, &[("COPPER_INGOT", 1)], &[("WIRE", 4)], 2, 2),
        recipe(
            "switch",
            bench,
            &[("STONE", 1), ("WIRE", 1), ("STICK", 1)],
            &[("SWITCH", 1)],
            3,
            2,
        ),
        recipe(
            "sensor",
            bench,
            &[("CRYSTAL_SHARD", 1), ("WIRE", 2), ("STONE", 1)],
            &[("SENSOR", 1)],
            4,
            3,
        ),
        recipe(
            "conveyor",
            bench,
            &[("IRON_INGOT", 2), ("PLANK", 2), ("WIRE", 1)],
            &[("CONVEYOR", 2)],
            4,
            2,
        ),
        recipe(
            "battery",
            bench,
            &[("COPPER_INGOT", 2), ("IRON_INGOT", 1), ("COAL", 2)],
            &[("BATTERY", 1)],
            6,
            2,
        ),
        recipe(
            "contract_terminal",
            bench,
            &[("IRON_INGOT", 4), ("CRYSTAL_SHARD", 2), ("PLANK", 4)],
            &[("CONTRACT_TERMINAL", 1)],
            8,
            3,
        ),
        recipe(
            "claim_totem",
            bench,
            &[("STONE", 4), ("CRYSTAL_SHARD", 1)],
            &[("CLAIM_TOTEM", 1)],
            6,
            3,
        ),
        recipe(
            "wood_pickaxe",
            "HAND",
            &[("PLANK", 3), ("STICK", 2)],
            &[("WOOD_PICKAXE", 1)],
            3,
            1,
        ),
        recipe(
            "stone_pickaxe",
            bench,
            &[("STONE", 3), ("STICK", 2)],
            &[("STONE_PICKAXE", 1)],
            4,
            2,
        ),
        recipe(
            "iron_pickaxe",
            bench,
            &[("IRON_INGOT", 3), ("STICK", 2)],
            &[("IRON_PICKAXE", 1)],
            6,
            3,
        ),
        recipe("bread", "HAND", &[("BERRIES", 3)], &[("BREAD", 1)], 3, 1),
        recipe(
            "smelt_iron",
            "FURNACE",
            &[("IRON_ORE", 1), ("COAL", 1)],
            &[("IRON_INGOT", 1)],
            10,
            2,
        ),
        recipe(
            "smelt_copper",
            "FURNACE",
            &[("COPPER_ORE", 1), ("COAL", 1)],
            &[("COPPER_INGOT", 1)],
            10,
            2,
        ),
        recipe(
            "cook_meat",
            "FURNACE",
            &[("RAW_MEAT", 1), ("COAL", 1)],
            &[("COOKED_MEAT", 1)],
            5,
            1,
        ),
        recipe(
            "smelt_glass",
            "FURNACE",
            &[("SAND", 1), ("COAL", 1)],
            &[("GLASS", 1)],
            6,
            1,
        ),
    ]
}

fn line(block: &str, offsets: &[[i32; 3]]) -> Vec<BlueprintBlock> {
    offsets
        .iter()
        .map(|pos| BlueprintBlock {
            pos: *pos,
            block: block.to_string(),
        })
        .collect()
}

fn builtin_blueprints() -> Vec<BlueprintDef> {
    let segment = [[0, 0, 0], [0, 0, 1], [0, 0, 2], [0, 0, 3], [0, 0, 4]];
    let turn = [
        [0, 0, 0],
        [0, 0, 1],
        [0, 0, 2],
        [0, 0, 3],
        [0, 0, 4],
        [1, 0, 4],
        [2, 0, 4],
        [3, 0, 4],
    ];
    let shelter = [
        [0, 0, 0],
        [1, 0, 0],
        [2, 0, 0],
        [2, 0, 1],
        [2, 0, 2],
        [1, 0, 2],
        [0, 0, 2],
        [0, 0, 1],
    ];
    let mut shelter_blocks = line("PLANK", &shelter);
    shelter_blocks.push(BlueprintBlock {
        pos: [1, 0, 1],
        block: "TORCH".to_string(),
    });
    vec![
        BlueprintDef {
            id: "road_segment".to_string(),
            blocks: line("PLANK", &segment),
            cost: Vec::new(),
            require_support: false,
        },
        BlueprintDef {
            id: "road_turn".to_string(),
            blocks: line("PLANK", &turn),
            cost: Vec::new(),
            require_support: false,
        },
        BlueprintDef {
            id: "shelter_small".to_string(),
            blocks: shelter_blocks,
            cost: stacks(&[("PLANK", 8), ("TORCH", 1)]),
            require_support: false,
        },
    ]
}

fn builtin_law_templates() -> Vec<LawTemplateDef> {
    let law = |id: &str, title: &str, params: &[&str]| LawTemplateDef {
        id: id.to_string(),
        title: title.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
    };
    vec![
        law("MARKET_TAX", "Market tax", &["market_tax"]),
        law("CURFEW_NO_BUILD", "Building curfew", &["start_time", "end_time"]),
        law(
            "FINE_BREAK_PER_BLOCK",
            "Fine for breaking blocks",
            &["fine_item", "fine_per_block"],
        ),
        law(
            "ACCESS_PASS_CORE",
            "Core access pass",
            &["ticket_item", "ticket_cost"],
        ),
    ]
}

fn builtin_events() -> Vec<EventTemplateDef> {
    let event = |id: &str, title: &str, description: &str, weight: u64, radius: i32| {
        EventTemplateDef {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            base_weight: weight,
            duration_ticks: 3000,
            radius,
            weather: None,
        }
    };
    let mut storm = event("STORM_FRONT", "Storm front", "Movement slows; shelter pays off.", 60, 0);
    storm.weather = Some("STORM".to_string());
    let mut cold = event("COLD_SNAP", "Cold snap", "Nights hurt without a torch nearby.", 60, 0);
    cold.weather = Some("COLD".to_string());
    vec![
        event("MARKET_WEEK", "Market week", "Market tax is halved; trade and contract.", 120, 32),
        event("CRYSTAL_RIFT", "Crystal rift", "A crystal seam has surfaced.", 100, 32),
        event("BUILDER_EXPO", "Builder expo", "Complete a blueprint and show it off.", 80, 40),
        event("FLOOD_WARNING", "Flood warning", "Low ground may flood; build levees.", 60, 40),
        event("RUINS_GATE", "Ruins gate", "Old ruins opened with a loot chest.", 80, 24),
        event("BANDIT_CAMP", "Bandit camp", "Bandits roam; travel in groups.", 60, 24),
        event("CIVIC_VOTE", "Civic vote", "Propose laws and vote for narrative credit.", 80, 32),
        event("BLUEPRINT_FAIR", "Blueprint fair", "Shared blueprints earn influence.", 60, 32),
        event("DEEP_VEIN", "Deep vein", "A rich ore vein is exposed.", 80, 40),
        storm,
        cold,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_palette_starts_with_air_and_is_sorted() {
        let catalog = CatalogBundle::builtin();
        assert_eq!(catalog.block_name(0), AIR);
        let names = catalog
            .palette()
            .iter()
            .skip(1)
            .map(|b| b.id.clone())
            .collect::<Vec<_>>();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!catalog.is_solid(catalog.block_or_air("CONVEYOR")));
        assert!(catalog.is_solid(catalog.block_or_air("STONE")));
    }

    #[test]
    fn digests_are_stable_across_builds() {
        let a = CatalogBundle::builtin();
        let b = CatalogBundle::builtin();
        assert_eq!(a.digests(), b.digests());
        assert_eq!(a.digests().block_palette.digest.len(), 64);
        assert_ne!(a.digests().recipes.digest, a.digests().blueprints.digest);
    }

    #[test]
    fn ore_drops_and_smelting_resolve() {
        let catalog = CatalogBundle::builtin();
        let coal = catalog.block_or_air("COAL_ORE");
        assert_eq!(catalog.drop_for(coal).as_deref(), Some("COAL"));
        let stone = catalog.block_or_air("STONE");
        assert_eq!(catalog.drop_for(stone).as_deref(), Some("STONE"));
        assert_eq!(catalog.drop_for(0), None);
        let smelt = catalog.smelt_recipe_for("IRON_ORE").expect("iron smelts");
        assert_eq!(smelt.outputs[0].item, "IRON_INGOT");
        assert_eq!(catalog.item_value("CONTRACT_TERMINAL"), 80);
        assert_eq!(catalog.item_value("UNKNOWN"), 1);
    }

    #[test]
    fn road_turn_rotates_clockwise() {
        let catalog = CatalogBundle::builtin();
        let bp = catalog.blueprints.get("road_turn").expect("road_turn");
        let placed = bp.placements(Vec3::new(10, 0, 10), 1);
        assert_eq!(placed[4].0, Vec3::new(14, 0, 10));
        assert_eq!(placed[7].0, Vec3::new(14, 0, 7));
    }

    #[test]
    fn load_falls_back_to_builtin_sections() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "voxel-catalog-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create dir");
        let tuning = Tuning {
            move_stamina_milli: 4,
            ..Tuning::default()
        };
        std::fs::write(
            dir.join("tuning.json"),
            serde_json::to_vec(&tuning).expect("serialize"),
        )
        .expect("write tuning");
        let loaded = CatalogBundle::load(&dir).expect("load");
        assert_eq!(loaded.tuning.move_stamina_milli, 4);
        assert_eq!(loaded.recipes.len(), CatalogBundle::builtin().recipes.len());
        assert_ne!(
            loaded.digests().tuning,
            CatalogBundle::builtin().digests().tuning
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
