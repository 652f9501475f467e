//! Cross-domain saga execution.
//!
//! Every mutation runs as a [`SagaPlan`]: lock all touched records in the
//! global order, apply the primary write, apply each dependent write while
//! recording its inverse, and on a dependent failure undo everything in
//! reverse before reporting [`SagaError::SyncFailure`].
//!
//! Once the locks are held the saga runs to completion without yielding,
//! so a dropped caller can only be cancelled while still waiting for locks.
//! Order sagas derive their pet from the order itself; if the order changed
//! between planning and locking, the plan is rebuilt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use petstore_core::{Domain, Fields, Record, Value};
use tracing::{debug, warn};

use crate::service::guard::{ConcurrencyGuard, LockSet};
use crate::service::saga::{
    is_linked, pet_order_patch, Compensation, DependentAction, DependentStep, PrimaryAction,
    SagaPlan, PET_AVAILABLE, PET_PENDING,
};
use crate::storage::{DomainStore, StoreError, StoreSet};

/// Failure of a saga.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SagaError {
    /// The primary write failed; nothing was applied.
    #[error(transparent)]
    Primary(StoreError),
    /// A dependent write failed and every applied step was undone.
    #[error("{saga}: {domain} sync failed: {cause}")]
    SyncFailure {
        saga: String,
        domain: Domain,
        cause: StoreError,
    },
    /// Undoing a failed saga failed too; state may be inconsistent.
    #[error("{saga}: rollback incomplete after {domain} failure ({cause}): {compensation}")]
    RollbackIncomplete {
        saga: String,
        domain: Domain,
        cause: StoreError,
        compensation: StoreError,
    },
    /// The primary record changed between planning and locking; nothing
    /// was applied.
    #[error("{saga}: {domain} {id} changed before its locks were taken")]
    Stale {
        saga: String,
        domain: Domain,
        id: u64,
    },
}

/// Records produced by a committed saga.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOutcome {
    /// The created or updated record, or the removed one for deletes.
    pub primary: Record,
    /// Dependent records written, in step order.
    pub dependents: Vec<Record>,
}

/// Executes mutations against the shared stores under the concurrency guard.
pub struct Orchestrator {
    stores: Arc<StoreSet>,
    guard: ConcurrencyGuard,
    attempts: AtomicU64,
}

impl Orchestrator {
    #[must_use]
    pub fn new(stores: Arc<StoreSet>, guard: ConcurrencyGuard) -> Self {
        Self {
            stores,
            guard,
            attempts: AtomicU64::new(0),
        }
    }

    /// Creates a record, with `id` or the next free one.
    ///
    /// An auto-allocated id can be filled by another saga's dependent write
    /// while this one waits for its locks; the create then moves on to the
    /// next free id.
    ///
    /// # Errors
    ///
    /// `Primary(DuplicateId)` for a taken explicit id, or whatever the saga
    /// reports.
    pub async fn create(
        &self,
        domain: Domain,
        id: Option<u64>,
        fields: Fields,
    ) -> Result<SagaOutcome, SagaError> {
        self.count_attempt(domain, "create");
        let store = self.stores.store(domain);
        loop {
            let reservation = store.reserve_id(id).map_err(SagaError::Primary)?;
            match self.execute(SagaPlan::for_create(reservation, fields.clone())).await {
                Err(SagaError::Primary(StoreError::DuplicateId { id: taken, .. })) if id.is_none() => {
                    debug!(%domain, id = taken, "allocated id filled meanwhile, reallocating");
                }
                result => return result,
            }
        }
    }

    /// Merges `fields` into record `id`.
    ///
    /// # Errors
    ///
    /// `Primary(NotFound | ValidationFailed | WriteRejected)`, or
    /// `SyncFailure` when an order's pet cannot follow it.
    pub async fn update(
        &self,
        domain: Domain,
        id: u64,
        fields: Fields,
    ) -> Result<SagaOutcome, SagaError> {
        self.count_attempt(domain, "update");
        self.execute_current(domain, |store| match domain {
            Domain::Order => {
                SagaPlan::for_order_update(id, store.peek(id).as_ref(), fields.clone())
            }
            _ => SagaPlan::for_update(domain, id, fields.clone()),
        })
        .await
    }

    /// Deletes record `id` and cascades per the domain's policy.
    ///
    /// # Errors
    ///
    /// `Primary(NotFound | WriteRejected)` or `SyncFailure`.
    pub async fn delete(&self, domain: Domain, id: u64) -> Result<SagaOutcome, SagaError> {
        self.count_attempt(domain, "delete");
        self.execute_current(domain, |store| match domain {
            Domain::Order => SagaPlan::for_order_delete(id, store.peek(id).as_ref()),
            _ => SagaPlan::for_delete(domain, id),
        })
        .await
    }

    /// Plans against the current record and executes, replanning while the
    /// record changes under the planner.
    async fn execute_current(
        &self,
        domain: Domain,
        plan: impl Fn(&DomainStore) -> SagaPlan,
    ) -> Result<SagaOutcome, SagaError> {
        let store = self.stores.store(domain);
        loop {
            match self.execute(plan(store)).await {
                Err(SagaError::Stale { saga, id, .. }) => {
                    debug!(%saga, %domain, id, "record changed before locking, replanning");
                }
                result => return result,
            }
        }
    }

    /// Number of mutation sagas started since construction.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<StoreSet> {
        &self.stores
    }

    /// Runs a plan to commit or full rollback. Locks are released on return.
    ///
    /// # Errors
    ///
    /// See [`SagaError`].
    pub async fn execute(&self, plan: SagaPlan) -> Result<SagaOutcome, SagaError> {
        let locks = self.guard.acquire(plan.lock_keys()).await;
        debug!(saga = %plan.name, locks = ?locks, "saga locks acquired");

        if let Some(expect) = &plan.expect {
            let current = self
                .stores
                .store(plan.domain)
                .find(&locks, plan.id)
                .map_err(SagaError::Primary)?;
            if !expect.holds(current.as_ref()) {
                return Err(SagaError::Stale {
                    saga: plan.name,
                    domain: plan.domain,
                    id: plan.id,
                });
            }
        }

        let SagaPlan {
            name,
            domain,
            id,
            primary,
            dependents,
            expect: _,
        } = plan;

        let mut undo: Vec<Compensation> = Vec::with_capacity(dependents.len() + 1);
        let primary = self
            .apply_primary(&locks, domain, id, primary, &mut undo)
            .map_err(SagaError::Primary)?;

        let mut written = Vec::with_capacity(dependents.len());
        for step in &dependents {
            match self.apply_dependent(&locks, step, &mut undo) {
                Ok(record) => written.extend(record),
                Err(cause) => {
                    metrics::counter!(
                        "petstore_saga_rollbacks_total",
                        "saga" => name.clone(),
                        "domain" => step.domain.as_str()
                    )
                    .increment(1);
                    warn!(saga = %name, domain = %step.domain, id = step.id, error = %cause,
                        "dependent write failed, rolling back");

                    if let Err(compensation) = self.compensate(&locks, undo) {
                        return Err(SagaError::RollbackIncomplete {
                            saga: name,
                            domain: step.domain,
                            cause,
                            compensation,
                        });
                    }
                    return Err(SagaError::SyncFailure {
                        saga: name,
                        domain: step.domain,
                        cause,
                    });
                }
            }
        }

        Ok(SagaOutcome {
            primary,
            dependents: written,
        })
    }

    fn apply_primary(
        &self,
        locks: &LockSet,
        domain: Domain,
        id: u64,
        action: PrimaryAction,
        undo: &mut Vec<Compensation>,
    ) -> Result<Record, StoreError> {
        let store = self.stores.store(domain);
        match action {
            PrimaryAction::Create {
                reservation,
                fields,
            } => {
                let record = store.create(locks, reservation, fields)?;
                undo.push(Compensation::Remove { domain, id });
                Ok(record)
            }
            PrimaryAction::Update { fields } => {
                let (previous, updated) = store.update(locks, id, fields)?;
                undo.push(Compensation::Restore(previous));
                Ok(updated)
            }
            PrimaryAction::Delete => {
                let removed = store.delete(locks, id)?;
                undo.push(Compensation::Restore(removed.clone()));
                Ok(removed)
            }
        }
    }

    fn apply_dependent(
        &self,
        locks: &LockSet,
        step: &DependentStep,
        undo: &mut Vec<Compensation>,
    ) -> Result<Option<Record>, StoreError> {
        let store = self.stores.store(step.domain);
        match &step.action {
            DependentAction::Upsert { insert, merge } => {
                let (previous, current) =
                    store.upsert(locks, step.id, insert.clone(), merge.clone())?;
                undo.push(match previous {
                    Some(previous) => Compensation::Restore(previous),
                    None => Compensation::Remove {
                        domain: step.domain,
                        id: step.id,
                    },
                });
                Ok(Some(current))
            }
            DependentAction::DeleteIfPresent => {
                if !store.contains(step.id) {
                    return Ok(None);
                }
                let removed = store.delete(locks, step.id)?;
                undo.push(Compensation::Restore(removed.clone()));
                Ok(Some(removed))
            }
            DependentAction::Adjust { field, delta } => {
                let (previous, updated) = store.adjust(locks, step.id, field, *delta)?;
                undo.push(Compensation::Restore(previous));
                Ok(Some(updated))
            }
            DependentAction::RequireAbsent => {
                if store.contains(step.id) {
                    return Err(StoreError::ValidationFailed {
                        domain: step.domain,
                        message: format!("{} {} still exists", step.domain, step.id),
                    });
                }
                Ok(None)
            }
            DependentAction::ClaimPet { order_id } => {
                let Some(pet) = store.find(locks, step.id)? else {
                    return Ok(None);
                };
                if pet.field("status").and_then(Value::as_str) != Some(PET_AVAILABLE) {
                    return Err(StoreError::ValidationFailed {
                        domain: step.domain,
                        message: format!("pet {} is not available for order", step.id),
                    });
                }
                let patch = pet_order_patch(Some(PET_PENDING), Some(*order_id));
                patch_recorded(store, locks, step.id, patch, undo)
            }
            DependentAction::FollowOrderStatus { order_id, status } => {
                match store.find(locks, step.id)? {
                    Some(pet) if is_linked(&pet, *order_id) => {
                        let unlink = (status == PET_AVAILABLE).then_some(0);
                        let patch = pet_order_patch(Some(status.as_str()), unlink);
                        patch_recorded(store, locks, step.id, patch, undo)
                    }
                    _ => Ok(None),
                }
            }
            DependentAction::ReleasePet { order_id } => match store.find(locks, step.id)? {
                Some(pet) if is_linked(&pet, *order_id) => {
                    let pending = pet.field("status").and_then(Value::as_str) == Some(PET_PENDING);
                    let patch = pet_order_patch(pending.then_some(PET_AVAILABLE), Some(0));
                    patch_recorded(store, locks, step.id, patch, undo)
                }
                _ => Ok(None),
            },
        }
    }

    /// Applies compensations newest first. Stops at the first failure.
    fn compensate(&self, locks: &LockSet, undo: Vec<Compensation>) -> Result<(), StoreError> {
        for compensation in undo.into_iter().rev() {
            let store = self.stores.store(compensation.domain());
            match compensation {
                Compensation::Remove { id, .. } => store.revert_insert(locks, id)?,
                Compensation::Restore(record) => store.restore(locks, record)?,
            }
        }
        Ok(())
    }

    fn count_attempt(&self, domain: Domain, verb: &'static str) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "petstore_saga_attempts_total",
            "saga" => format!("{verb}{}", domain.type_name())
        )
        .increment(1);
    }
}

fn patch_recorded(
    store: &DomainStore,
    locks: &LockSet,
    id: u64,
    patch: Fields,
    undo: &mut Vec<Compensation>,
) -> Result<Option<Record>, StoreError> {
    let (previous, updated) = store.update(locks, id, patch)?;
    undo.push(Compensation::Restore(previous));
    Ok(Some(updated))
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use petstore_core::Value;

    use super::*;
    use crate::service::guard::LockKey;
    use crate::storage::StoreFactory;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(StoreFactory::new().build(), ConcurrencyGuard::new())
    }

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn pet(name: &str) -> Fields {
        fields(&[("name", name.into()), ("type", "dog".into())])
    }

    #[tokio::test]
    async fn create_pet_writes_matching_inventory() {
        let orch = orchestrator();
        let outcome = orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();

        assert_eq!(outcome.primary.id, 1);
        assert_eq!(outcome.dependents.len(), 1);
        let inventory = &outcome.dependents[0];
        assert_eq!(inventory.id, 1);
        assert_eq!(inventory.field("pet_id"), Some(&Value::Int(1)));
        assert_eq!(inventory.field("inventory"), Some(&Value::Int(1)));
        assert!(orch.stores().store(Domain::Inventory).contains(1));
        assert_eq!(orch.attempts(), 1);
        assert_eq!(orch.guard().tracked(), 0);
    }

    #[tokio::test]
    async fn create_pet_keeps_existing_stock() {
        let orch = orchestrator();
        orch.create(
            Domain::Inventory,
            Some(2),
            fields(&[("inventory", Value::Int(7))]),
        )
        .await
        .unwrap();

        let outcome = orch.create(Domain::Pet, Some(2), pet("Rex")).await.unwrap();
        let inventory = &outcome.dependents[0];
        assert_eq!(inventory.field("inventory"), Some(&Value::Int(7)));
        assert_eq!(inventory.field("pet_id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn failed_inventory_sync_removes_the_pet() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();
        orch.stores()
            .store(Domain::Inventory)
            .inject_write_failure(Some("inventory offline".to_string()));

        let err = orch.create(Domain::Pet, None, pet("Fido")).await.unwrap_err();
        let SagaError::SyncFailure { saga, domain, cause } = err else {
            panic!("expected sync failure, got {err:?}");
        };
        assert_eq!(saga, "createPet");
        assert_eq!(domain, Domain::Inventory);
        assert!(matches!(cause, StoreError::WriteRejected { .. }));

        assert_eq!(orch.stores().store(Domain::Pet).len(), 1);
        assert_eq!(orch.stores().store(Domain::Inventory).len(), 1);
        assert!(!orch.stores().store(Domain::Pet).contains(2));
        assert_eq!(orch.guard().tracked(), 0);
    }

    #[tokio::test]
    async fn failed_merge_restores_previous_inventory() {
        let orch = orchestrator();
        orch.create(
            Domain::Inventory,
            Some(3),
            fields(&[("inventory", Value::Int(5))]),
        )
        .await
        .unwrap();
        orch.stores()
            .store(Domain::Inventory)
            .inject_write_failure(Some("offline".to_string()));

        assert!(orch.create(Domain::Pet, Some(3), pet("Rex")).await.is_err());

        let guard = orch.guard().acquire([LockKey::new(Domain::Inventory, 3)]).await;
        let inventory = orch.stores().store(Domain::Inventory).get(&guard, 3).unwrap();
        assert_eq!(inventory.field("pet_id"), None);
        assert_eq!(inventory.field("inventory"), Some(&Value::Int(5)));
        assert!(orch.stores().store(Domain::Pet).is_empty());
    }

    #[tokio::test]
    async fn delete_pet_cascades_to_inventory() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();

        let outcome = orch.delete(Domain::Pet, 1).await.unwrap();
        assert_eq!(outcome.primary.id, 1);
        assert_eq!(outcome.dependents.len(), 1);
        assert!(orch.stores().store(Domain::Pet).is_empty());
        assert!(orch.stores().store(Domain::Inventory).is_empty());
    }

    #[tokio::test]
    async fn delete_pet_without_inventory_succeeds() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();
        let locks = orch.guard().acquire([LockKey::new(Domain::Inventory, 1)]).await;
        orch.stores()
            .store(Domain::Inventory)
            .revert_insert(&locks, 1)
            .unwrap();
        drop(locks);

        let outcome = orch.delete(Domain::Pet, 1).await.unwrap();
        assert!(outcome.dependents.is_empty());
    }

    #[tokio::test]
    async fn inventory_of_live_pet_cannot_be_deleted() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();

        let err = orch.delete(Domain::Inventory, 1).await.unwrap_err();
        assert!(matches!(err, SagaError::SyncFailure { domain: Domain::Pet, .. }));
        assert!(orch.stores().store(Domain::Inventory).contains(1));
    }

    #[tokio::test]
    async fn order_draws_down_stock_or_rolls_back() {
        let orch = orchestrator();
        orch.create(
            Domain::Inventory,
            Some(1),
            fields(&[("inventory", Value::Int(3))]),
        )
        .await
        .unwrap();
        let order = |amount: i64| {
            fields(&[
                ("inven_id", Value::Int(1)),
                ("amount_purchase", Value::Int(amount)),
            ])
        };

        let outcome = orch.create(Domain::Order, None, order(2)).await.unwrap();
        assert_eq!(outcome.primary.field("status"), Some(&"placed".into()));
        assert_eq!(outcome.dependents[0].field("inventory"), Some(&Value::Int(1)));

        let err = orch.create(Domain::Order, None, order(5)).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::SyncFailure {
                domain: Domain::Inventory,
                cause: StoreError::ValidationFailed { .. },
                ..
            }
        ));
        assert_eq!(orch.stores().store(Domain::Order).len(), 1);

        let missing = fields(&[("inven_id", Value::Int(9)), ("amount_purchase", Value::Int(1))]);
        let err = orch.create(Domain::Order, None, missing).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::SyncFailure { cause: StoreError::NotFound { id: 9, .. }, .. }
        ));
    }

    #[tokio::test]
    async fn primary_failures_are_reported_unwrapped() {
        let orch = orchestrator();
        assert!(matches!(
            orch.update(Domain::Vet, 4, Fields::new()).await,
            Err(SagaError::Primary(StoreError::NotFound { .. }))
        ));

        orch.create(Domain::Pet, Some(1), pet("Rex")).await.unwrap();
        assert!(matches!(
            orch.create(Domain::Pet, Some(1), pet("Rex")).await,
            Err(SagaError::Primary(StoreError::DuplicateId { id: 1, .. }))
        ));
    }

    fn order_for(item: i64, amount: i64) -> Fields {
        fields(&[
            ("inven_id", Value::Int(item)),
            ("amount_purchase", Value::Int(amount)),
        ])
    }

    fn status(value: &str) -> Fields {
        fields(&[("status", value.into())])
    }

    async fn pet_record(orch: &Orchestrator, id: u64) -> Record {
        let locks = orch.guard().acquire([LockKey::new(Domain::Pet, id)]).await;
        orch.stores().store(Domain::Pet).get(&locks, id).unwrap()
    }

    #[tokio::test]
    async fn order_claims_an_available_pet() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();

        let outcome = orch.create(Domain::Order, None, order_for(1, 1)).await.unwrap();
        assert_eq!(outcome.dependents.len(), 2);
        let rex = pet_record(&orch, 1).await;
        assert_eq!(rex.field("status"), Some(&"pending".into()));
        assert_eq!(rex.field("order_id"), Some(&Value::Int(1)));

        // Restock, then a second order for the same pet is refused.
        orch.update(Domain::Inventory, 1, fields(&[("inventory", Value::Int(3))]))
            .await
            .unwrap();
        let err = orch.create(Domain::Order, None, order_for(1, 1)).await.unwrap_err();
        assert!(matches!(err, SagaError::SyncFailure { domain: Domain::Pet, .. }));
        assert_eq!(orch.stores().store(Domain::Order).len(), 1);
        let locks = orch.guard().acquire([LockKey::new(Domain::Inventory, 1)]).await;
        let stock = orch.stores().store(Domain::Inventory).get(&locks, 1).unwrap();
        assert_eq!(stock.field("inventory"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn pet_follows_its_order_status() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();
        orch.create(Domain::Order, None, order_for(1, 1)).await.unwrap();

        let outcome = orch.update(Domain::Order, 1, status("sold")).await.unwrap();
        assert_eq!(outcome.primary.field("status"), Some(&"sold".into()));
        assert_eq!(pet_record(&orch, 1).await.field("status"), Some(&"sold".into()));

        // Back to available cancels the claim.
        orch.update(Domain::Order, 1, status("available")).await.unwrap();
        let rex = pet_record(&orch, 1).await;
        assert_eq!(rex.field("status"), Some(&"available".into()));
        assert_eq!(rex.field("order_id"), Some(&Value::Int(0)));

        // No longer linked: further order updates leave the pet alone.
        orch.update(Domain::Order, 1, status("pending")).await.unwrap();
        assert_eq!(pet_record(&orch, 1).await.field("status"), Some(&"available".into()));
    }

    #[tokio::test]
    async fn failed_pet_write_rolls_back_order_update() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();
        orch.create(Domain::Order, None, order_for(1, 1)).await.unwrap();
        orch.stores()
            .store(Domain::Pet)
            .inject_write_failure(Some("pets offline".to_string()));

        let err = orch.update(Domain::Order, 1, status("sold")).await.unwrap_err();
        let SagaError::SyncFailure { saga, domain, .. } = err else {
            panic!("expected sync failure, got {err:?}");
        };
        assert_eq!((saga.as_str(), domain), ("updateOrder", Domain::Pet));

        let locks = orch.guard().acquire([LockKey::new(Domain::Order, 1)]).await;
        let order = orch.stores().store(Domain::Order).get(&locks, 1).unwrap();
        assert_eq!(order.field("status"), Some(&"placed".into()));
        drop(locks);
        assert_eq!(pet_record(&orch, 1).await.field("status"), Some(&"pending".into()));
    }

    #[tokio::test]
    async fn deleting_an_order_releases_its_pet() {
        let orch = orchestrator();
        orch.create(Domain::Pet, None, pet("Rex")).await.unwrap();
        orch.create(Domain::Order, None, order_for(1, 1)).await.unwrap();

        orch.stores()
            .store(Domain::Pet)
            .inject_write_failure(Some("pets offline".to_string()));
        assert!(matches!(
            orch.delete(Domain::Order, 1).await,
            Err(SagaError::SyncFailure { domain: Domain::Pet, .. })
        ));
        assert!(orch.stores().store(Domain::Order).contains(1));

        orch.stores().store(Domain::Pet).inject_write_failure(None);
        let outcome = orch.delete(Domain::Order, 1).await.unwrap();
        assert_eq!(outcome.dependents.len(), 1);
        let rex = pet_record(&orch, 1).await;
        assert_eq!(rex.field("status"), Some(&"available".into()));
        assert_eq!(rex.field("order_id"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn outdated_plan_is_refused_untouched() {
        let orch = orchestrator();
        orch.create(Domain::Inventory, Some(2), fields(&[("inventory", Value::Int(4))]))
            .await
            .unwrap();
        orch.create(Domain::Order, None, order_for(2, 1)).await.unwrap();

        let seen = Record::new(Domain::Order, 1, order_for(7, 1));
        let err = orch
            .execute(SagaPlan::for_order_delete(1, Some(&seen)))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Stale { domain: Domain::Order, id: 1, .. }));
        assert!(orch.stores().store(Domain::Order).contains(1));
        assert_eq!(orch.guard().tracked(), 0);
    }

    #[tokio::test]
    async fn auto_id_moves_past_slot_filled_by_pet_sync() {
        let orch = Arc::new(orchestrator());
        let held = orch.guard().acquire([LockKey::new(Domain::Inventory, 1)]).await;

        // Queues on inventory 1 first, so its sync lands first.
        let pet_task = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.create(Domain::Pet, Some(1), pet("Rex")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        // Reserves inventory id 1, then waits behind the pet saga.
        let inventory_task = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                orch.create(Domain::Inventory, None, fields(&[("inventory", Value::Int(9))]))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        drop(held);

        pet_task.await.unwrap().unwrap();
        let created = inventory_task.await.unwrap().unwrap();
        assert_eq!(created.primary.id, 2);
        assert_eq!(created.primary.field("inventory"), Some(&Value::Int(9)));

        let locks = orch.guard().acquire([LockKey::new(Domain::Inventory, 1)]).await;
        let synced = orch.stores().store(Domain::Inventory).get(&locks, 1).unwrap();
        assert_eq!(synced.field("pet_id"), Some(&Value::Int(1)));
        assert_eq!(synced.field("inventory"), Some(&Value::Int(1)));
    }
}
