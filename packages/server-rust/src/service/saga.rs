//! Saga plans: the ordered store operations behind one mutation.
//!
//! A plan names its primary write and the dependent writes that keep the
//! cross-domain invariants, and knows every record it will lock. The
//! [`Orchestrator`](super::orchestrator::Orchestrator) executes plans.

use petstore_core::{id_to_i64, Domain, EntitySchema, Fields, Record, Value};

use crate::service::guard::LockKey;
use crate::storage::IdReservation;

/// Stock field of an inventory record.
pub const STOCK_FIELD: &str = "inventory";
/// Order field naming its inventory record, which shares the pet's id.
pub const ORDER_ITEM_FIELD: &str = "inven_id";
/// Pet field naming the order that claimed it; 0 when unclaimed.
pub const ORDER_LINK_FIELD: &str = "order_id";
pub const PET_AVAILABLE: &str = "available";
pub const PET_PENDING: &str = "pending";

/// The first write of a saga. Its failure leaves nothing to undo.
#[derive(Debug)]
pub enum PrimaryAction {
    Create {
        reservation: IdReservation,
        fields: Fields,
    },
    Update {
        fields: Fields,
    },
    Delete,
}

/// A follow-up write that keeps another domain consistent with the primary.
#[derive(Debug, Clone, PartialEq)]
pub enum DependentAction {
    /// Insert `insert` if absent, else merge `merge` into the existing record.
    Upsert { insert: Fields, merge: Fields },
    /// Delete the record if it exists.
    DeleteIfPresent,
    /// Add `delta` to an integer field, failing below zero.
    Adjust { field: &'static str, delta: i64 },
    /// Fail if the record exists.
    RequireAbsent,
    /// Claim the pet for a new order: it must be `available`, and becomes
    /// `pending` and linked to the order. No pet under the id is fine.
    ClaimPet { order_id: u64 },
    /// Give the pet linked to the order the order's new status. `available`
    /// also unlinks it. A pet not linked to this order is left alone.
    FollowOrderStatus { order_id: u64, status: String },
    /// Unlink the pet from a removed order; a `pending` pet becomes `available`.
    ReleasePet { order_id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependentStep {
    pub domain: Domain,
    pub id: u64,
    pub action: DependentAction,
}

/// Inverse of an applied step.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    /// Remove a record the saga inserted.
    Remove { domain: Domain, id: u64 },
    /// Put back the version of a record from before the saga.
    Restore(Record),
}

impl Compensation {
    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            Compensation::Remove { domain, .. } => *domain,
            Compensation::Restore(record) => record.domain,
        }
    }
}

/// A field of the primary record as the planner saw it before locking.
///
/// Plans whose dependents are derived from the primary record carry one;
/// the orchestrator re-reads the record under its lock and replans on a
/// mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub field: &'static str,
    /// `None` when the record was absent.
    pub value: Option<Value>,
}

impl Expectation {
    #[must_use]
    pub fn observe(record: Option<&Record>, field: &'static str) -> Self {
        Self {
            field,
            value: record.map(|r| r.field(field).cloned().unwrap_or(Value::Null)),
        }
    }

    #[must_use]
    pub fn holds(&self, record: Option<&Record>) -> bool {
        Self::observe(record, self.field) == *self
    }
}

/// One executable saga.
#[derive(Debug)]
pub struct SagaPlan {
    /// Mutation field name, e.g. `createPet`.
    pub name: String,
    pub domain: Domain,
    /// Id of the primary record.
    pub id: u64,
    pub primary: PrimaryAction,
    pub dependents: Vec<DependentStep>,
    pub expect: Option<Expectation>,
}

impl SagaPlan {
    /// Plan for `create<Type>` under an already reserved id.
    #[must_use]
    pub fn for_create(reservation: IdReservation, fields: Fields) -> Self {
        let domain = reservation.domain();
        let id = reservation.id();
        let dependents = match domain {
            Domain::Pet => vec![DependentStep {
                domain: Domain::Inventory,
                id,
                action: DependentAction::Upsert {
                    insert: inventory_fields(id, Some(1)),
                    merge: inventory_fields(id, None),
                },
            }],
            Domain::Order => order_steps(id, &fields),
            _ => Vec::new(),
        };
        Self {
            name: mutation_name("create", domain),
            domain,
            id,
            primary: PrimaryAction::Create {
                reservation,
                fields,
            },
            dependents,
            expect: None,
        }
    }

    /// Plan for `update<Type>` without dependents. Orders use
    /// [`SagaPlan::for_order_update`].
    #[must_use]
    pub fn for_update(domain: Domain, id: u64, fields: Fields) -> Self {
        Self {
            name: mutation_name("update", domain),
            domain,
            id,
            primary: PrimaryAction::Update { fields },
            dependents: Vec::new(),
            expect: None,
        }
    }

    /// Plan for `updateOrder`, given the order as read before locking.
    ///
    /// A new status that is also a pet status is passed on to the pet the
    /// order claimed.
    #[must_use]
    pub fn for_order_update(id: u64, observed: Option<&Record>, fields: Fields) -> Self {
        let status = fields
            .get("status")
            .and_then(Value::as_str)
            .filter(|status| is_pet_status(status));
        let dependents = match (observed.and_then(order_item), status) {
            (Some(pet_id), Some(status)) => vec![DependentStep {
                domain: Domain::Pet,
                id: pet_id,
                action: DependentAction::FollowOrderStatus {
                    order_id: id,
                    status: status.to_string(),
                },
            }],
            _ => Vec::new(),
        };
        Self {
            name: mutation_name("update", Domain::Order),
            domain: Domain::Order,
            id,
            primary: PrimaryAction::Update { fields },
            dependents,
            expect: Some(Expectation::observe(observed, ORDER_ITEM_FIELD)),
        }
    }

    /// Plan for `deleteOrder`, given the order as read before locking.
    /// The claimed pet is released.
    #[must_use]
    pub fn for_order_delete(id: u64, observed: Option<&Record>) -> Self {
        let dependents = observed
            .and_then(order_item)
            .map(|pet_id| DependentStep {
                domain: Domain::Pet,
                id: pet_id,
                action: DependentAction::ReleasePet { order_id: id },
            })
            .into_iter()
            .collect();
        Self {
            name: mutation_name("delete", Domain::Order),
            domain: Domain::Order,
            id,
            primary: PrimaryAction::Delete,
            dependents,
            expect: Some(Expectation::observe(observed, ORDER_ITEM_FIELD)),
        }
    }

    /// Plan for `delete<Type>`.
    ///
    /// Deleting a pet removes its inventory record; an inventory record
    /// cannot be deleted while its pet exists.
    #[must_use]
    pub fn for_delete(domain: Domain, id: u64) -> Self {
        let dependents = match domain {
            Domain::Pet => vec![DependentStep {
                domain: Domain::Inventory,
                id,
                action: DependentAction::DeleteIfPresent,
            }],
            Domain::Inventory => vec![DependentStep {
                domain: Domain::Pet,
                id,
                action: DependentAction::RequireAbsent,
            }],
            _ => Vec::new(),
        };
        Self {
            name: mutation_name("delete", domain),
            domain,
            id,
            primary: PrimaryAction::Delete,
            dependents,
            expect: None,
        }
    }

    /// Every record the saga touches, primary first.
    #[must_use]
    pub fn lock_keys(&self) -> Vec<LockKey> {
        std::iter::once(LockKey::new(self.domain, self.id))
            .chain(self.dependents.iter().map(|d| LockKey::new(d.domain, d.id)))
            .collect()
    }

    #[must_use]
    pub fn is_single_step(&self) -> bool {
        self.dependents.is_empty()
    }
}

fn mutation_name(verb: &str, domain: Domain) -> String {
    format!("{verb}{}", domain.type_name())
}

fn inventory_fields(pet_id: u64, stock: Option<i64>) -> Fields {
    let mut fields = Fields::new();
    fields.insert("pet_id".to_string(), Value::Int(petstore_core::id_to_i64(pet_id)));
    if let Some(stock) = stock {
        fields.insert(STOCK_FIELD.to_string(), Value::Int(stock));
    }
    fields
}

/// Fields that claim a pet for `order_id` or release it.
#[must_use]
pub fn pet_order_patch(status: Option<&str>, order_id: Option<u64>) -> Fields {
    let mut fields = Fields::new();
    if let Some(status) = status {
        fields.insert("status".to_string(), Value::from(status));
    }
    if let Some(order_id) = order_id {
        fields.insert(ORDER_LINK_FIELD.to_string(), Value::Int(id_to_i64(order_id)));
    }
    fields
}

/// Whether `pet` is claimed by order `order_id`.
#[must_use]
pub fn is_linked(pet: &Record, order_id: u64) -> bool {
    pet.field(ORDER_LINK_FIELD).and_then(Value::as_i64) == Some(id_to_i64(order_id))
}

fn is_pet_status(status: &str) -> bool {
    EntitySchema::for_domain(Domain::Pet)
        .field("status")
        .is_some_and(|def| def.check(&Value::from(status)).is_ok())
}

fn order_item(order: &Record) -> Option<u64> {
    item_id(&order.fields)
}

fn item_id(fields: &Fields) -> Option<u64> {
    fields
        .get(ORDER_ITEM_FIELD)
        .and_then(Value::as_i64)
        .and_then(|id| u64::try_from(id).ok())
}

/// An order draws `amount_purchase` from inventory record `inven_id`, then
/// claims the pet sharing that id.
fn order_steps(order_id: u64, fields: &Fields) -> Vec<DependentStep> {
    let Some(item) = item_id(fields) else {
        return Vec::new();
    };
    let mut steps = Vec::with_capacity(2);
    if let Some(amount) = fields.get("amount_purchase").and_then(Value::as_i64) {
        steps.push(DependentStep {
            domain: Domain::Inventory,
            id: item,
            action: DependentAction::Adjust {
                field: STOCK_FIELD,
                delta: amount.saturating_neg(),
            },
        });
    }
    steps.push(DependentStep {
        domain: Domain::Pet,
        id: item,
        action: DependentAction::ClaimPet { order_id },
    });
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreFactory;

    #[test]
    fn create_pet_syncs_inventory_with_same_id() {
        let stores = StoreFactory::new().build();
        let reservation = stores.store(Domain::Pet).reserve_id(Some(4)).unwrap();
        let plan = SagaPlan::for_create(reservation, Fields::new());

        assert_eq!(plan.name, "createPet");
        assert_eq!(plan.id, 4);
        assert_eq!(plan.dependents.len(), 1);
        let step = &plan.dependents[0];
        assert_eq!((step.domain, step.id), (Domain::Inventory, 4));
        let DependentAction::Upsert { insert, merge } = &step.action else {
            panic!("expected upsert, got {:?}", step.action);
        };
        assert_eq!(insert.get(STOCK_FIELD), Some(&Value::Int(1)));
        assert!(!merge.contains_key(STOCK_FIELD));
        assert_eq!(
            plan.lock_keys(),
            vec![LockKey::new(Domain::Pet, 4), LockKey::new(Domain::Inventory, 4)]
        );
    }

    #[test]
    fn create_order_draws_stock() {
        let stores = StoreFactory::new().build();
        let reservation = stores.store(Domain::Order).reserve_id(None).unwrap();
        let mut fields = Fields::new();
        fields.insert("inven_id".to_string(), Value::Int(2));
        fields.insert("amount_purchase".to_string(), Value::Int(3));

        let plan = SagaPlan::for_create(reservation, fields);
        assert_eq!(
            plan.dependents,
            vec![
                DependentStep {
                    domain: Domain::Inventory,
                    id: 2,
                    action: DependentAction::Adjust {
                        field: STOCK_FIELD,
                        delta: -3
                    },
                },
                DependentStep {
                    domain: Domain::Pet,
                    id: 2,
                    action: DependentAction::ClaimPet { order_id: 1 },
                },
            ]
        );
        assert_eq!(
            plan.lock_keys(),
            vec![
                LockKey::new(Domain::Order, 1),
                LockKey::new(Domain::Inventory, 2),
                LockKey::new(Domain::Pet, 2),
            ]
        );
    }

    fn order(id: u64, item: i64) -> Record {
        let mut fields = Fields::new();
        fields.insert(ORDER_ITEM_FIELD.to_string(), Value::Int(item));
        fields.insert("amount_purchase".to_string(), Value::Int(1));
        Record::new(Domain::Order, id, fields)
    }

    #[test]
    fn order_status_follows_to_pet_statuses_only() {
        let observed = order(5, 3);
        let mut sold = Fields::new();
        sold.insert("status".to_string(), "sold".into());
        let plan = SagaPlan::for_order_update(5, Some(&observed), sold);
        assert_eq!(plan.name, "updateOrder");
        assert_eq!(
            plan.dependents,
            vec![DependentStep {
                domain: Domain::Pet,
                id: 3,
                action: DependentAction::FollowOrderStatus {
                    order_id: 5,
                    status: "sold".to_string()
                },
            }]
        );

        // `placed` is an order status only.
        let mut placed = Fields::new();
        placed.insert("status".to_string(), "placed".into());
        assert!(SagaPlan::for_order_update(5, Some(&observed), placed).is_single_step());
    }

    #[test]
    fn order_plans_expect_the_observed_item() {
        let observed = order(5, 3);
        let plan = SagaPlan::for_order_delete(5, Some(&observed));
        assert_eq!(plan.dependents[0].action, DependentAction::ReleasePet { order_id: 5 });
        let expect = plan.expect.unwrap();
        assert!(expect.holds(Some(&observed)));
        assert!(!expect.holds(Some(&order(5, 4))));
        assert!(!expect.holds(None));

        let absent = SagaPlan::for_order_delete(5, None);
        assert!(absent.is_single_step());
        assert!(absent.expect.unwrap().holds(None));
    }

    #[test]
    fn link_helpers() {
        let mut pet = Record::new(Domain::Pet, 3, pet_order_patch(Some(PET_PENDING), Some(5)));
        assert!(is_linked(&pet, 5));
        assert!(!is_linked(&pet, 6));
        pet.fields.extend(pet_order_patch(None, Some(0)));
        assert!(!is_linked(&pet, 5));
        assert_eq!(pet.field("status"), Some(&Value::from(PET_PENDING)));
    }

    #[test]
    fn delete_policies() {
        let pet = SagaPlan::for_delete(Domain::Pet, 1);
        assert_eq!(pet.name, "deletePet");
        assert_eq!(pet.dependents[0].action, DependentAction::DeleteIfPresent);

        let inventory = SagaPlan::for_delete(Domain::Inventory, 1);
        assert_eq!(inventory.dependents[0].domain, Domain::Pet);
        assert_eq!(inventory.dependents[0].action, DependentAction::RequireAbsent);

        assert!(SagaPlan::for_delete(Domain::Vet, 1).is_single_step());
        assert!(SagaPlan::for_update(Domain::Pet, 1, Fields::new()).is_single_step());
    }
}
