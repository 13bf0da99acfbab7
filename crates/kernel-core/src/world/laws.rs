use super::*;

fn param_f64(params: &BTreeMap<String, Value>, key: &str) -> Result<f64, String> {
    let value = params.get(key).ok_or_else(|| format!("missing {key}"))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("bad {key}"))
}

fn param_i64(params: &BTreeMap<String, Value>, key: &str) -> Result<i64, String> {
    let value = params.get(key).ok_or_else(|| format!("missing {key}"))?;
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("bad {key}"))
}

fn param_str(params: &BTreeMap<String, Value>, key: &str) -> Result<String, String> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(format!("bad {key}")),
        None => Err(format!("missing {key}")),
    }
}

/// Validates and clamps template parameters into their canonical string form.
pub(super) fn normalize_law_params(
    template_id: &str,
    params: &BTreeMap<String, Value>,
    item_exists: impl Fn(&str) -> bool,
) -> Result<BTreeMap<String, String>, String> {
    let mut out = BTreeMap::new();
    match template_id {
        "MARKET_TAX" => {
            let tax = param_f64(params, "market_tax")?.clamp(0.0, 0.25);
            out.insert("market_tax".to_string(), tax.to_string());
        }
        "CURFEW_NO_BUILD" => {
            let start = param_f64(params, "start_time")?.clamp(0.0, 1.0);
            let end = param_f64(params, "end_time")?.clamp(0.0, 1.0);
            out.insert("start_time".to_string(), start.to_string());
            out.insert("end_time".to_string(), end.to_string());
        }
        "FINE_BREAK_PER_BLOCK" => {
            let item = param_str(params, "fine_item")?;
            if !item_exists(&item) {
                return Err("unknown fine_item".to_string());
            }
            let fine = param_i64(params, "fine_per_block")?.clamp(0, 100);
            out.insert("fine_item".to_string(), item);
            out.insert("fine_per_block".to_string(), fine.to_string());
        }
        "ACCESS_PASS_CORE" => {
            let item = param_str(params, "ticket_item")?;
            if !item_exists(&item) {
                return Err("unknown ticket_item".to_string());
            }
            let cost = param_i64(params, "ticket_cost")?.clamp(0, 64);
            out.insert("ticket_item".to_string(), item);
            out.insert("ticket_cost".to_string(), cost.to_string());
        }
        _ => return Err("unsupported template".to_string()),
    }
    Ok(out)
}

fn stored_f64(params: &BTreeMap<String, String>, key: &str) -> Result<f64, String> {
    params
        .get(key)
        .ok_or_else(|| format!("missing {key}"))?
        .parse::<f64>()
        .map_err(|_| format!("bad {key}"))
}

fn stored_u32(params: &BTreeMap<String, String>, key: &str) -> Result<u32, String> {
    params
        .get(key)
        .ok_or_else(|| format!("missing {key}"))?
        .parse::<u32>()
        .map_err(|_| format!("bad {key}"))
}

impl VoxelWorld {
    /// NOTICE -> VOTING -> ACTIVE | REJECTED, in law id order.
    pub(super) fn run_law_system(&mut self) {
        let now = self.tick;
        let ids: Vec<String> = self
            .laws
            .values()
            .filter(|law| matches!(law.status, LawStatus::Notice | LawStatus::Voting))
            .map(|law| law.law_id.clone())
            .collect();
        for law_id in ids {
            let Some(law) = self.laws.get(&law_id).cloned() else {
                continue;
            };
            match law.status {
                LawStatus::Notice if now >= law.notice_ends_tick => {
                    self.set_law_status(&law_id, LawStatus::Voting);
                    self.broadcast_law(&law_id, "VOTING", None);
                }
                LawStatus::Voting if now >= law.vote_ends_tick => self.close_vote(&law),
                _ => {}
            }
        }
    }

    fn set_law_status(&mut self, law_id: &str, status: LawStatus) {
        if let Some(law) = self.laws.get_mut(law_id) {
            law.status = status;
        }
    }

    fn close_vote(&mut self, law: &Law) {
        let yes = law.votes.values().filter(|v| **v == VoteChoice::Yes).count();
        let no = law.votes.values().filter(|v| **v == VoteChoice::No).count();
        let anchor = self.claims.get(&law.land_id).map(|claim| claim.anchor);
        if yes <= no {
            self.set_law_status(&law.law_id, LawStatus::Rejected);
            self.audit(
                "LAW_REJECTED",
                SYSTEM_ACTOR,
                anchor,
                "VOTE_FAILED",
                json!({"law_id": law.law_id, "land_id": law.land_id, "yes": yes, "no": no}),
            );
            self.broadcast_law(&law.law_id, "REJECTED", Some("vote failed".to_string()));
            return;
        }
        if let Err(message) = self.activate_law(law) {
            self.set_law_status(&law.law_id, LawStatus::Rejected);
            self.audit(
                "LAW_REJECTED",
                SYSTEM_ACTOR,
                anchor,
                "ACTIVATE_FAILED",
                json!({"law_id": law.law_id, "land_id": law.land_id, "message": message}),
            );
            self.broadcast_law(&law.law_id, "REJECTED", Some(message));
            return;
        }
        self.set_law_status(&law.law_id, LawStatus::Active);
        self.audit(
            "LAW_ACTIVE",
            SYSTEM_ACTOR,
            anchor,
            "VOTE_PASSED",
            json!({"law_id": law.law_id, "land_id": law.land_id, "yes": yes, "no": no, "params": law.params}),
        );
        self.award_fun(&law.proposed_by, FunDim::Influence, "law_adopted", 4, "LAW_ADOPTED");
        self.award_fun(&law.proposed_by, FunDim::Narrative, "law_adopted", 5, "LAW_ADOPTED");
        self.broadcast_law(&law.law_id, "ACTIVE", None);
    }

    /// Writes the template's effect onto the claim.
    fn activate_law(&mut self, law: &Law) -> Result<(), String> {
        let claim = self
            .claims
            .get_mut(&law.land_id)
            .ok_or_else(|| "land not found".to_string())?;
        let params = &law.params;
        match law.template_id.as_str() {
            "MARKET_TAX" => {
                claim.market_tax = stored_f64(params, "market_tax")?.clamp(0.0, 0.25);
            }
            "CURFEW_NO_BUILD" => {
                let start = stored_f64(params, "start_time")?.clamp(0.0, 1.0);
                let end = stored_f64(params, "end_time")?.clamp(0.0, 1.0);
                if start == end {
                    claim.curfew_enabled = false;
                    claim.curfew_start = 0.0;
                    claim.curfew_end = 0.0;
                } else {
                    claim.curfew_enabled = true;
                    claim.curfew_start = start;
                    claim.curfew_end = end;
                }
            }
            "FINE_BREAK_PER_BLOCK" => {
                let fine = stored_u32(params, "fine_per_block")?;
                let item = params.get("fine_item").cloned().filter(|_| fine > 0);
                claim.fine_per_block = if item.is_some() { fine } else { 0 };
                claim.fine_item = item;
            }
            "ACCESS_PASS_CORE" => {
                let cost = stored_u32(params, "ticket_cost")?;
                let item = params.get("ticket_item").cloned().filter(|_| cost > 0);
                claim.access_pass_cost = if item.is_some() { cost } else { 0 };
                claim.access_pass_item = item;
            }
            _ => return Err("unsupported template".to_string()),
        }
        Ok(())
    }

    pub(super) fn broadcast_law(&mut self, law_id: &str, kind: &str, message: Option<String>) {
        let Some(law) = self.laws.get(law_id) else {
            return;
        };
        let event = Event::Law {
            t: self.tick,
            kind: kind.to_string(),
            law_id: law.law_id.clone(),
            land_id: law.land_id.clone(),
            template_id: law.template_id.clone(),
            title: law.title.clone(),
            status: law.status.to_string(),
            message,
        };
        self.broadcast(event);
    }

    /// Mining a totem dissolves the claim and every law attached to it.
    pub(super) fn remove_claim_at_totem(&mut self, pos: Vec3, actor: &str) {
        let Some(land_id) = self
            .claims
            .values()
            .find(|claim| claim.anchor == pos)
            .map(|claim| claim.land_id.clone())
        else {
            return;
        };
        self.claims.remove(&land_id);
        let laws: Vec<String> = self
            .laws
            .values()
            .filter(|law| law.land_id == land_id)
            .map(|law| law.law_id.clone())
            .collect();
        for law_id in &laws {
            self.laws.remove(law_id);
        }
        self.audit(
            "CLAIM_REMOVED",
            actor,
            Some(pos),
            "TOTEM_MINED",
            json!({"land_id": land_id, "laws": laws}),
        );
    }
}

#[cfg(test)]
mod law_tests {
    use super::*;

    fn params(raw: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(raw).expect("params object")
    }

    #[test]
    fn params_are_clamped_and_canonical() {
        let known = |item: &str| item == "IRON_INGOT";
        let tax = normalize_law_params("MARKET_TAX", &params(json!({"market_tax": 0.9})), known).expect("tax");
        assert_eq!(tax["market_tax"], "0.25");
        let curfew = normalize_law_params(
            "CURFEW_NO_BUILD",
            &params(json!({"start_time": "0.8", "end_time": 1.5})),
            known,
        )
        .expect("curfew");
        assert_eq!(curfew["end_time"], "1");
        let fine = normalize_law_params(
            "FINE_BREAK_PER_BLOCK",
            &params(json!({"fine_item": "IRON_INGOT", "fine_per_block": 500})),
            known,
        )
        .expect("fine");
        assert_eq!(fine["fine_per_block"], "100");
        assert!(normalize_law_params(
            "ACCESS_PASS_CORE",
            &params(json!({"ticket_item": "UNOBTAINIUM", "ticket_cost": 1})),
            known,
        )
        .is_err());
        assert!(normalize_law_params("NO_SUCH", &BTreeMap::new(), known).is_err());
    }
}
