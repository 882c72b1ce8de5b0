//! PinballMap location sync.
//!
//! A location with a PinballMap id mirrors the machine list PinballMap
//! publishes for it. [`plan_sync`] decides what changes; [`sync_location`]
//! applies the plan inside one transaction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::{IssueStatus, StatusGroup, SyncReport};

use crate::db::schema::{issues, locations, machine_models, machines};
use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::{Location, Machine, MachineModel, NewMachine, NewMachineModel};
use crate::services::qr;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteMachine {
    pub id: i32,
    pub name: String,
    pub year: Option<i32>,
    pub manufacturer: Option<String>,
    pub ipdb_id: Option<i32>,
    pub opdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MachineDetails {
    machines: Vec<RemoteMachine>,
}

pub struct PinballMapClient {
    client: reqwest::Client,
    base_url: String,
}

impl PinballMapClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub async fn location_machines(&self, pinballmap_id: i32) -> AppResult<Vec<RemoteMachine>> {
        let url = format!(
            "{}/locations/{}/machine_details.json",
            self.base_url, pinballmap_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("PinballMap request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "PinballMap returned {} for location {}",
                resp.status().as_u16(),
                pinballmap_id
            )));
        }
        let details: MachineDetails = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("unexpected PinballMap response: {e}")))?;
        Ok(details.machines)
    }
}

/// A machine already at the location, with the catalog ids of its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMachine {
    pub machine_id: i32,
    pub name: String,
    pub model_pinballmap_id: Option<i32>,
    pub model_opdb_id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_add: Vec<RemoteMachine>,
    pub unchanged: Vec<LocalMachine>,
    pub stale: Vec<LocalMachine>,
}

/// Pairs each remote machine with at most one local machine, by model
/// PinballMap id first and OPDB id second.
pub fn plan_sync(local: &[LocalMachine], remote: &[RemoteMachine]) -> SyncPlan {
    let mut matched = vec![false; local.len()];
    let mut plan = SyncPlan::default();

    for r in remote {
        let by_pinballmap = local
            .iter()
            .enumerate()
            .position(|(i, l)| !matched[i] && l.model_pinballmap_id == Some(r.id));
        let found = by_pinballmap.or_else(|| {
            let opdb = r.opdb_id.as_deref()?;
            local.iter().enumerate().position(|(i, l)| {
                !matched[i] && l.model_opdb_id.as_deref() == Some(opdb)
            })
        });
        match found {
            Some(i) => {
                matched[i] = true;
                plan.unchanged.push(local[i].clone());
            }
            None => plan.to_add.push(r.clone()),
        }
    }

    plan.stale = local
        .iter()
        .zip(&matched)
        .filter(|(_, m)| !**m)
        .map(|(l, _)| l.clone())
        .collect();
    plan
}

/// Uppercase 2-4 character initials for `name` that are not in `taken`.
pub fn derive_initials(name: &str, taken: &HashSet<String>) -> Option<String> {
    // Drop edition suffixes like "(Premium)".
    let base = name.split('(').next().unwrap_or(name);
    let words: Vec<String> = base
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter(|w| !w.eq_ignore_ascii_case("the"))
        .map(|w| w.to_ascii_uppercase())
        .collect();

    let letters: String = words.concat();
    if letters.len() < 2 {
        return None;
    }

    let mut candidate: String = words.iter().filter_map(|w| w.chars().next()).take(4).collect();
    if candidate.len() < 2 {
        candidate = letters.chars().take(3).collect();
    }
    if !taken.contains(&candidate) {
        return Some(candidate);
    }

    let stem3: String = candidate.chars().take(3).collect();
    for n in 2..=9 {
        let next = format!("{stem3}{n}");
        if !taken.contains(&next) {
            return Some(next);
        }
    }
    let stem2: String = candidate.chars().take(2).collect();
    (10..=99)
        .map(|n| format!("{stem2}{n}"))
        .find(|c| !taken.contains(c))
}

/// Gives each machine to add its initials, claiming them in `taken`.
/// Machines whose names yield no usable initials come back separately.
pub fn assign_initials(
    to_add: Vec<RemoteMachine>,
    taken: &mut HashSet<String>,
) -> (Vec<(RemoteMachine, String)>, Vec<RemoteMachine>) {
    let mut assigned = Vec::new();
    let mut skipped = Vec::new();
    for r in to_add {
        match derive_initials(&r.name, taken) {
            Some(initials) => {
                taken.insert(initials.clone());
                assigned.push((r, initials));
            }
            None => skipped.push(r),
        }
    }
    (assigned, skipped)
}

/// Syncs one location. `dry_run` reports without writing; stale machines
/// are only deleted with `remove_stale` and when they have no open issues.
pub async fn sync_location(
    client: &PinballMapClient,
    conn: &mut AsyncPgConnection,
    location: &Location,
    dry_run: bool,
    remove_stale: bool,
) -> AppResult<SyncReport> {
    let pinballmap_id = location.pinballmap_id.ok_or_else(|| {
        AppError::Validation(format!("location '{}' has no PinballMap id", location.name))
    })?;

    let remote = client.location_machines(pinballmap_id).await?;

    let existing: Vec<(Machine, MachineModel)> = machines::table
        .inner_join(machine_models::table)
        .filter(machines::location_id.eq(location.id))
        .select((Machine::as_select(), MachineModel::as_select()))
        .load(conn)
        .await?;
    let local: Vec<LocalMachine> = existing
        .iter()
        .map(|(m, model)| LocalMachine {
            machine_id: m.id,
            name: m.name.clone(),
            model_pinballmap_id: model.pinballmap_id,
            model_opdb_id: model.opdb_id.clone(),
        })
        .collect();

    let plan = plan_sync(&local, &remote);

    let stale_ids: Vec<i32> = plan.stale.iter().map(|l| l.machine_id).collect();
    let open: Vec<&'static str> = StatusGroup::Open
        .statuses()
        .iter()
        .map(IssueStatus::as_str)
        .collect();
    let busy: HashSet<i32> = issues::table
        .filter(issues::machine_id.eq_any(&stale_ids))
        .filter(issues::status.eq_any(&open))
        .select(issues::machine_id)
        .distinct()
        .load::<i32>(conn)
        .await?
        .into_iter()
        .collect();

    let mut report = SyncReport {
        dry_run,
        unchanged: plan.unchanged.iter().map(|l| l.name.clone()).collect(),
        ..SyncReport::default()
    };
    let (removable, kept): (Vec<&LocalMachine>, Vec<&LocalMachine>) = plan
        .stale
        .iter()
        .partition(|l| remove_stale && !busy.contains(&l.machine_id));
    report.removed = removable.iter().map(|l| l.name.clone()).collect();
    report.stale = kept.iter().map(|l| l.name.clone()).collect();

    let mut taken: HashSet<String> = machines::table
        .filter(machines::organization_id.eq(location.organization_id))
        .select(machines::initials)
        .load::<String>(conn)
        .await?
        .into_iter()
        .collect();
    let (to_add, skipped) = assign_initials(plan.to_add, &mut taken);
    for r in &skipped {
        tracing::warn!(location_id = location.id, name = %r.name, "no initials for PinballMap machine, skipping");
    }
    report.skipped = skipped.into_iter().map(|r| r.name).collect();

    if dry_run {
        report.added = to_add.into_iter().map(|(r, _)| r.name).collect();
        return Ok(report);
    }

    let removable_ids: Vec<i32> = removable.iter().map(|l| l.machine_id).collect();
    let organization_id = location.organization_id;
    let location_id = location.id;

    let (added, created_models) = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let mut added = Vec::new();
                let mut created_models = Vec::new();
                for (r, initials) in &to_add {
                    let (model, created) = find_or_create_model(conn, organization_id, r).await?;
                    if created {
                        created_models.push(model.name.clone());
                    }

                    diesel::insert_into(machines::table)
                        .values(&NewMachine {
                            organization_id,
                            location_id,
                            model_id: model.id,
                            name: r.name.clone(),
                            initials: initials.clone(),
                            owner_id: None,
                            qr_code_id: qr::generate_code(),
                        })
                        .execute(conn)
                        .await?;
                    added.push(r.name.clone());
                }

                if !removable_ids.is_empty() {
                    diesel::delete(machines::table.filter(machines::id.eq_any(&removable_ids)))
                        .execute(conn)
                        .await?;
                }

                diesel::update(locations::table.find(location_id))
                    .set(locations::last_synced_at.eq(Some(Utc::now())))
                    .execute(conn)
                    .await?;

                Ok((added, created_models))
            }
            .scope_boxed()
        })
        .await?;

    report.added = added;
    report.created_models = created_models;
    tracing::info!(
        location_id,
        added = report.added.len(),
        removed = report.removed.len(),
        stale = report.stale.len(),
        skipped = report.skipped.len(),
        "PinballMap sync applied"
    );
    Ok(report)
}

async fn find_or_create_model(
    conn: &mut AsyncPgConnection,
    organization_id: i32,
    remote: &RemoteMachine,
) -> AppResult<(MachineModel, bool)> {
    let by_pinballmap: Option<MachineModel> = machine_models::table
        .filter(machine_models::pinballmap_id.eq(remote.id))
        .filter(machine_models::organization_id.is_null())
        .select(MachineModel::as_select())
        .first(conn)
        .await
        .optional()?;
    if let Some(model) = by_pinballmap {
        return Ok((model, false));
    }

    if let Some(opdb_id) = &remote.opdb_id {
        let by_opdb: Option<MachineModel> = machine_models::table
            .filter(machine_models::opdb_id.eq(opdb_id))
            .filter(
                machine_models::organization_id
                    .is_null()
                    .or(machine_models::organization_id.eq(organization_id)),
            )
            .select(MachineModel::as_select())
            .first(conn)
            .await
            .optional()?;
        if let Some(model) = by_opdb {
            return Ok((model, false));
        }
    }

    let model = diesel::insert_into(machine_models::table)
        .values(&NewMachineModel {
            organization_id: None,
            name: remote.name.clone(),
            manufacturer: remote.manufacturer.clone(),
            year: remote.year,
            opdb_id: remote.opdb_id.clone(),
            pinballmap_id: Some(remote.id),
            ipdb_id: remote.ipdb_id,
            is_custom: false,
        })
        .returning(MachineModel::as_returning())
        .get_result(conn)
        .await?;
    Ok((model, true))
}

/// Background loop syncing every location with `sync_enabled`.
pub fn spawn_periodic_sync(state: Arc<AppState>) {
    let minutes = state.config.pinballmap_sync_interval_minutes;
    if minutes == 0 {
        return;
    }
    let Some(period) = minutes.checked_mul(60).map(Duration::from_secs) else {
        tracing::error!(minutes, "PinballMap sync interval out of range, periodic sync disabled");
        return;
    };
    tracing::info!(minutes, "PinballMap periodic sync enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sync_all(&state.pool, &state.pinballmap).await {
                tracing::error!("periodic PinballMap sync failed: {e}");
            }
        }
    });
}

async fn sync_all(pool: &DbPool, client: &PinballMapClient) -> AppResult<()> {
    let targets: Vec<Location> = {
        let mut conn = db::system(pool).await?;
        locations::table
            .filter(locations::sync_enabled.eq(true))
            .filter(locations::pinballmap_id.is_not_null())
            .select(Location::as_select())
            .load(&mut conn)
            .await?
    };

    for location in targets {
        let mut conn = db::scoped(pool, location.organization_id).await?;
        match sync_location(client, &mut conn, &location, false, false).await {
            Ok(report) => tracing::debug!(
                location_id = location.id,
                added = report.added.len(),
                "location synced"
            ),
            Err(e) => tracing::warn!(location_id = location.id, "location sync failed: {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: i32, name: &str, pbm: Option<i32>, opdb: Option<&str>) -> LocalMachine {
        LocalMachine {
            machine_id: id,
            name: name.into(),
            model_pinballmap_id: pbm,
            model_opdb_id: opdb.map(String::from),
        }
    }

    fn remote(id: i32, name: &str, opdb: Option<&str>) -> RemoteMachine {
        RemoteMachine {
            id,
            name: name.into(),
            year: None,
            manufacturer: None,
            ipdb_id: None,
            opdb_id: opdb.map(String::from),
        }
    }

    #[test]
    fn plan_matches_by_pinballmap_then_opdb() {
        let locals = vec![
            local(1, "Medieval Madness", Some(100), None),
            local(2, "Attack from Mars", None, Some("G4do5")),
            local(3, "Old Machine", Some(300), None),
        ];
        let remotes = vec![
            remote(100, "Medieval Madness", None),
            remote(200, "Attack from Mars", Some("G4do5")),
            remote(400, "Godzilla", None),
        ];
        let plan = plan_sync(&locals, &remotes);
        assert_eq!(plan.unchanged.iter().map(|l| l.machine_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(plan.to_add, vec![remote(400, "Godzilla", None)]);
        assert_eq!(plan.stale, vec![local(3, "Old Machine", Some(300), None)]);
    }

    #[test]
    fn duplicate_models_match_one_to_one() {
        let locals = vec![local(1, "Twilight Zone", Some(5), None)];
        let remotes = vec![remote(5, "Twilight Zone", None), remote(5, "Twilight Zone", None)];
        let plan = plan_sync(&locals, &remotes);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.to_add.len(), 1);
        assert!(plan.stale.is_empty());
    }

    #[test]
    fn empty_remote_makes_everything_stale() {
        let locals = vec![local(1, "A", Some(1), None), local(2, "B", None, None)];
        let plan = plan_sync(&locals, &[]);
        assert_eq!(plan.stale.len(), 2);
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn initials_from_words() {
        let none = HashSet::new();
        assert_eq!(derive_initials("Medieval Madness", &none).as_deref(), Some("MM"));
        assert_eq!(derive_initials("The Addams Family", &none).as_deref(), Some("AF"));
        assert_eq!(derive_initials("Godzilla (Premium)", &none).as_deref(), Some("GOD"));
        assert_eq!(
            derive_initials("Star Trek: The Next Generation", &none).as_deref(),
            Some("STNG")
        );
        assert_eq!(derive_initials("Terminator 2", &none).as_deref(), Some("T2"));
    }

    #[test]
    fn initials_avoid_taken() {
        let taken: HashSet<String> = ["MM", "MM2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(derive_initials("Medieval Madness", &taken).as_deref(), Some("MM3"));
    }

    #[test]
    fn unnameable_machines_are_skipped_not_fatal() {
        let mut taken: HashSet<String> = ["MM"].iter().map(|s| s.to_string()).collect();
        let to_add = vec![
            remote(1, "Medieval Madness", None),
            remote(2, "\u{3a9}", None),
            remote(3, "(Unknown) Title", None),
            remote(4, "Godzilla", None),
        ];
        let (assigned, skipped) = assign_initials(to_add, &mut taken);
        let initials: Vec<&str> = assigned.iter().map(|(_, i)| i.as_str()).collect();
        assert_eq!(initials, vec!["MM2", "GOD"]);
        assert_eq!(
            skipped.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(taken.contains("MM2") && taken.contains("GOD"));
    }

    #[test]
    fn initials_need_two_letters() {
        assert_eq!(derive_initials("X", &HashSet::new()), None);
    }
}
