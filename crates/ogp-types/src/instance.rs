use std::any::Any;
use std::sync::Arc;

use crate::error::{PersistenceError, PersistenceResult};
use crate::object::ObjectId;

/// Shared, type-erased handle to a persistable instance.
///
/// Identity is the address of the shared allocation, never value equality:
/// two equal values in different allocations are two objects.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Identity key of an instance (its allocation address).
pub fn identity_of(instance: &Instance) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

/// Returns `true` if both handles point to the same allocation.
pub fn same_instance(a: &Instance, b: &Instance) -> bool {
    identity_of(a) == identity_of(b)
}

/// Borrow the concrete value behind an instance handle.
pub fn downcast<T: Any + Send + Sync>(instance: &Instance, oid: ObjectId) -> PersistenceResult<&T> {
    (**instance)
        .downcast_ref::<T>()
        .ok_or_else(|| PersistenceError::TypeMismatch {
            oid,
            expected: std::any::type_name::<T>().to_string(),
            actual: type_name_of(instance),
        })
}

/// Best-effort name of the concrete type behind an instance, for diagnostics.
pub fn type_name_of(instance: &Instance) -> String {
    format!("{:?}", Any::type_id(&**instance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_by_allocation() {
        let a: Instance = Arc::new(5i32);
        let b: Instance = Arc::new(5i32);
        let a2 = Arc::clone(&a);
        assert!(same_instance(&a, &a2));
        assert!(!same_instance(&a, &b));
        assert_eq!(identity_of(&a), identity_of(&a2));
    }

    #[test]
    fn downcast_checks_type() {
        let value: Instance = Arc::new(String::from("x"));
        assert_eq!(downcast::<String>(&value, ObjectId::new(1)).unwrap(), "x");
        let err = downcast::<i64>(&value, ObjectId::new(1)).unwrap_err();
        assert!(matches!(err, PersistenceError::TypeMismatch { .. }));
    }
}
