use super::*;

impl VoxelWorld {
    /// Applies one envelope: tick gate, cancellations, instants, then tasks.
    pub(super) fn apply_envelope(&mut self, envelope: &ActionEnvelope) {
        let now = self.tick;
        let agent_id = envelope.agent_id.as_str();
        let act = &envelope.act;
        if !self.agents.contains_key(agent_id) {
            return;
        }
        if now.abs_diff(act.tick) > self.config.stale_tick_tolerance {
            let reference = act.act_id.clone().unwrap_or_else(|| "ACT".to_string());
            self.emit(
                agent_id,
                Event::err(
                    now,
                    reference,
                    ErrorCode::Stale,
                    format!("stale act tick {} (now {now})", act.tick),
                ),
            );
            return;
        }
        for task_id in &act.cancel {
            self.cancel_task(agent_id, task_id.trim(), "cancelled");
        }
        for instant in &act.instants {
            if !self.agents.contains_key(agent_id) {
                break;
            }
            self.dispatch_instant(agent_id, instant);
        }
        for task in &act.tasks {
            if !self.agents.contains_key(agent_id) {
                break;
            }
            self.dispatch_task(agent_id, task);
        }
    }

    fn dispatch_instant(&mut self, agent_id: &str, req: &InstantReq) {
        let now = self.tick;
        let outcome = match InstantKind::parse(&req.kind) {
            None => Err(Reject::new(
                ErrorCode::ProtoBadRequest,
                format!("unknown instant type {}", req.kind),
            )),
            Some(kind) => self.run_instant(agent_id, kind, req),
        };
        let result = outcome.unwrap_or_else(|reject| reject.into_event(now, &req.id));
        self.emit(agent_id, Event::ActionResult(result));
    }

    fn run_instant(&mut self, agent_id: &str, kind: InstantKind, req: &InstantReq) -> Outcome {
        match kind {
            InstantKind::Say => self.instant_say(agent_id, req),
            InstantKind::Whisper => self.instant_whisper(agent_id, req),
            InstantKind::PostBoard => self.instant_post_board(agent_id, req),
            InstantKind::SearchBoard => self.instant_search_board(agent_id, req),
            InstantKind::SetSign => self.instant_set_sign(agent_id, req),
            InstantKind::ToggleSwitch => self.instant_toggle_switch(agent_id, req),
            InstantKind::Open => self.instant_open(agent_id, req),
            InstantKind::SaveMemory => self.instant_save_memory(agent_id, req),
            InstantKind::ListMemory => self.instant_list_memory(agent_id, req),
            InstantKind::OfferTrade => self.instant_offer_trade(agent_id, req),
            InstantKind::AcceptTrade => self.instant_accept_trade(agent_id, req),
            InstantKind::DeclineTrade => self.instant_decline_trade(agent_id, req),
            InstantKind::Eat => self.instant_eat(agent_id, req),
            InstantKind::PostContract => self.instant_post_contract(agent_id, req),
            InstantKind::AcceptContract => self.instant_accept_contract(agent_id, req),
            InstantKind::SubmitContract => self.instant_submit_contract(agent_id, req),
            InstantKind::ClaimOwed => self.instant_claim_owed(agent_id, req),
            InstantKind::OrgDeposit => self.instant_org_deposit(agent_id, req),
            InstantKind::OrgWithdraw => self.instant_org_withdraw(agent_id, req),
            InstantKind::AddMember => self.instant_add_member(agent_id, req),
            InstantKind::RemoveMember => self.instant_remove_member(agent_id, req),
            InstantKind::DeedLand => self.instant_deed_land(agent_id, req),
            InstantKind::UpgradeClaim => self.instant_upgrade_claim(agent_id, req),
            InstantKind::SetPolicy => self.instant_set_policy(agent_id, req),
            InstantKind::ProposeLaw => self.instant_propose_law(agent_id, req),
            InstantKind::Vote => self.instant_vote(agent_id, req),
            InstantKind::CreateOrg => self.instant_create_org(agent_id, req),
            InstantKind::JoinOrg => self.instant_join_org(agent_id, req),
            InstantKind::LeaveOrg => self.instant_leave_org(agent_id, req),
            InstantKind::SwitchWorld => Err(Reject::bad_request(
                "SWITCH_WORLD requires the world manager",
            )),
        }
    }

    fn dispatch_task(&mut self, agent_id: &str, req: &TaskReq) {
        let now = self.tick;
        let outcome = match TaskKind::parse(&req.kind) {
            None => Err(Reject::new(
                ErrorCode::ProtoBadRequest,
                format!("unknown task type {}", req.kind),
            )),
            Some(kind) => self.start_task(agent_id, kind, req),
        };
        match outcome {
            Ok(result) => {
                let task_id = result.task_id.clone();
                self.emit(agent_id, Event::ActionResult(result));
                if let Some(task_id) = task_id {
                    self.emit(
                        agent_id,
                        Event::TaskStart {
                            t: now,
                            task_id,
                            kind: req.kind.trim().to_ascii_uppercase(),
                        },
                    );
                }
            }
            Err(reject) => {
                let result = reject.into_event(now, &req.id);
                self.emit(agent_id, Event::ActionResult(result));
            }
        }
    }

    /// Removes the task with `task_id` from either slot, refunding consumed inputs.
    pub(super) fn cancel_task(&mut self, agent_id: &str, task_id: &str, reason: &str) {
        let now = self.tick;
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        let mut failed = None;
        if agent
            .move_task
            .as_ref()
            .map(|task| task.task_id == task_id)
            .unwrap_or(false)
        {
            if let Some(task) = agent.move_task.take() {
                let kind = match task.kind {
                    MoveKind::MoveTo => "MOVE_TO",
                    MoveKind::Follow => "FOLLOW",
                };
                failed = Some((task.task_id, kind.to_string()));
            }
        } else if agent
            .work_task
            .as_ref()
            .map(|task| task.task_id == task_id)
            .unwrap_or(false)
        {
            if let Some(task) = agent.work_task.take() {
                inv_merge(&mut agent.inventory, &task.consumed);
                failed = Some((task.task_id, task.kind.wire_name().to_string()));
            }
        }
        if let Some((task_id, kind)) = failed {
            self.emit(
                agent_id,
                Event::TaskFail {
                    t: now,
                    task_id,
                    kind,
                    code: ErrorCode::Conflict,
                    message: reason.to_string(),
                },
            );
        }
    }

    pub(super) fn cancel_all_tasks(&mut self, agent_id: &str, reason: &str) {
        let ids: Vec<String> = self
            .agents
            .get(agent_id)
            .map(|agent| {
                agent
                    .move_task
                    .iter()
                    .map(|task| task.task_id.clone())
                    .chain(agent.work_task.iter().map(|task| task.task_id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for task_id in ids {
            self.cancel_task(agent_id, &task_id, reason);
        }
    }

    /// Ends the work task with TASK_FAIL, refunding anything it consumed.
    pub(super) fn fail_work(&mut self, agent_id: &str, code: ErrorCode, message: &str) {
        let now = self.tick;
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        let Some(task) = agent.work_task.take() else {
            return;
        };
        inv_merge(&mut agent.inventory, &task.consumed);
        self.emit(
            agent_id,
            Event::TaskFail {
                t: now,
                task_id: task.task_id,
                kind: task.kind.wire_name().to_string(),
                code,
                message: message.to_string(),
            },
        );
    }

    pub(super) fn finish_work(&mut self, agent_id: &str) {
        let now = self.tick;
        let Some(task) = self
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.work_task.take())
        else {
            return;
        };
        self.emit(
            agent_id,
            Event::TaskDone {
                t: now,
                task_id: task.task_id,
                kind: task.kind.wire_name().to_string(),
            },
        );
    }
}
