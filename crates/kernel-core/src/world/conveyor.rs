//! Conveyor power and item flow.

use super::*;

const WIRE_NODE_CAP: usize = 1024;

impl VoxelWorld {
    /// A sensor reads ON while any XZ neighbour container holds unreserved items.
    pub(super) fn sensor_on(&self, pos: Vec3) -> bool {
        pos.neighbours_xz().into_iter().any(|next| {
            self.containers
                .get(&next)
                .map(|container| {
                    container
                        .inventory
                        .keys()
                        .any(|item| container.available(item) > 0)
                })
                .unwrap_or(false)
        })
    }

    fn control_on(&self, pos: Vec3) -> Option<bool> {
        match self.block_name_at(pos) {
            "SWITCH" => Some(self.switches.get(&pos).map(|s| s.on).unwrap_or(false)),
            "SENSOR" => Some(self.sensor_on(pos)),
            _ => None,
        }
    }

    /// Adjacent switches and sensors decide first, then an adjacent wire network, else on.
    pub(super) fn conveyor_enabled(&self, pos: Vec3) -> bool {
        let mut found_control = false;
        for next in pos.neighbours_xz() {
            match self.control_on(next) {
                Some(true) => return true,
                Some(false) => found_control = true,
                None => {}
            }
        }
        if found_control {
            return false;
        }
        let wires: Vec<Vec3> = pos
            .neighbours_xz()
            .into_iter()
            .filter(|next| self.block_name_at(*next) == "WIRE")
            .collect();
        if wires.is_empty() {
            return true;
        }
        self.wire_powered(&wires, WIRE_NODE_CAP)
    }

    fn wire_powered(&self, starts: &[Vec3], max_nodes: usize) -> bool {
        let mut visited: BTreeSet<Vec3> = starts.iter().copied().collect();
        let mut queue: VecDeque<Vec3> = starts.iter().copied().collect();
        while let Some(wire) = queue.pop_front() {
            if visited.len() > max_nodes {
                return false;
            }
            for next in wire.neighbours_xz() {
                if self.control_on(next) == Some(true) {
                    return true;
                }
            }
            for next in wire.neighbours_xz() {
                if self.block_name_at(next) == "WIRE" && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Moves belt items one cell forward, then pulls one unit per idle belt from its back container.
    pub(super) fn run_conveyor_system(&mut self) {
        if self.conveyors.is_empty() {
            return;
        }
        let item_ids: Vec<String> = self
            .items
            .values()
            .filter(|item| item.count > 0 && self.conveyors.contains_key(&item.pos))
            .map(|item| item.id.clone())
            .collect();
        for item_id in item_ids {
            let Some(item) = self.items.get(&item_id).cloned() else {
                continue;
            };
            let Some(belt) = self.conveyors.get(&item.pos).cloned() else {
                continue;
            };
            if self.block_name_at(belt.pos) != "CONVEYOR" || !self.conveyor_enabled(belt.pos) {
                continue;
            }
            let to = belt.front();
            if let Some(container) = self.containers.get_mut(&to) {
                inv_add(&mut container.inventory, &item.item, item.count);
                let container_id = container.id.clone();
                self.items.remove(&item_id);
                self.audit(
                    "CONVEYOR_INSERT",
                    SYSTEM_ACTOR,
                    Some(to),
                    "CONVEYOR",
                    json!({"entity_id": item_id, "container_id": container_id, "item": item.item, "count": item.count}),
                );
                continue;
            }
            if !self.walkable(to) && !self.conveyors.contains_key(&to) {
                continue;
            }
            if let Some(slot) = self.items.get_mut(&item_id) {
                slot.pos = to;
            }
        }

        let belts: Vec<Conveyor> = self.conveyors.values().cloned().collect();
        for belt in belts {
            if self.block_name_at(belt.pos) != "CONVEYOR" || !self.conveyor_enabled(belt.pos) {
                continue;
            }
            if !self.items_at(belt.pos).is_empty() {
                continue;
            }
            let back = belt.back();
            let Some(container) = self.containers.get_mut(&back) else {
                continue;
            };
            let Some(item) = container
                .inventory
                .keys()
                .find(|item| container.available(item) > 0)
                .cloned()
            else {
                continue;
            };
            inv_take(&mut container.inventory, &item, 1);
            self.spawn_item(belt.pos, &item, 1);
            self.audit(
                "CONVEYOR_PULL",
                SYSTEM_ACTOR,
                Some(belt.pos),
                "CONVEYOR",
                json!({"from": back.to_array(), "item": item, "count": 1}),
            );
        }
    }
}
