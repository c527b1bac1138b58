//! Filter - boolean test dispatch over objects
//!
//! A filter wraps a single test callback. It carries no state beyond the
//! interface base; thread safety of the test itself is entirely the
//! backend's responsibility.

use std::sync::Arc;

use crate::error::{FilterResult, ObjectError};
use crate::interface::InterfaceCore;
use crate::object::{Object, TypeDescriptor};

/// Dispatch trait for filter backends.
pub trait FilterBackend: Send + Sync {
    /// Perform the test. The default models a dispatch table without the
    /// test slot: every test is an error.
    fn test(&self, _ctx: &InterfaceCore, _object: &Object) -> FilterResult {
        FilterResult::Error
    }

    /// Teardown hook, invoked once when the filter object dies. Clearing the
    /// backend object here transfers its cleanup to the backend.
    fn on_teardown(&self, _ctx: &InterfaceCore) {}
}

struct FilterPayload {
    core: InterfaceCore,
    backend: Box<dyn FilterBackend>,
}

fn filter_teardown(payload: &(dyn std::any::Any + Send + Sync)) {
    let Some(p) = payload.downcast_ref::<FilterPayload>() else {
        return;
    };
    p.backend.on_teardown(&p.core);
    p.core.release_backend_object();
}

/// Type descriptor for filter objects.
pub static FILTER_TYPE: TypeDescriptor = TypeDescriptor::new("filter").with_teardown(filter_teardown);

/// Handle to a filter object.
#[derive(Clone)]
pub struct Filter {
    object: Object,
}

impl Filter {
    /// Create a filter from a backend.
    pub fn new(
        backend: Box<dyn FilterBackend>,
        backend_object: Option<&Object>,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Filter, ObjectError> {
        let core = InterfaceCore::new(backend_object)?;
        let object = Object::new_with_payload(
            &FILTER_TYPE,
            FilterPayload { core, backend },
            name,
            associated,
        )?;
        Ok(Filter { object })
    }

    /// Type-checked view of a generic handle as a filter. Returns `None`
    /// for dead handles and other kinds; takes no ownership share.
    pub fn from_object(object: &Object) -> Option<Filter> {
        object.is_valid(&FILTER_TYPE).then(|| Filter {
            object: object.clone(),
        })
    }

    /// The underlying object handle.
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    pub fn retain(&self) -> Result<(), ObjectError> {
        self.object.retain()
    }

    pub fn release(&self) -> Result<(), ObjectError> {
        self.object.release()
    }

    fn payload(&self) -> Option<Arc<FilterPayload>> {
        self.object.payload()?.downcast::<FilterPayload>().ok()
    }

    /// Test an object against this filter.
    pub fn test(&self, object: &Object) -> FilterResult {
        match self.payload() {
            Some(p) => p.backend.test(&p.core, object),
            None => FilterResult::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::BASE_TYPE;

    struct SlotlessBackend;
    impl FilterBackend for SlotlessBackend {}

    struct VerdictBackend(FilterResult);
    impl FilterBackend for VerdictBackend {
        fn test(&self, _ctx: &InterfaceCore, _object: &Object) -> FilterResult {
            self.0
        }
    }

    #[test]
    fn test_missing_test_slot_is_error() {
        let filter = Filter::new(Box::new(SlotlessBackend), None, None, None).unwrap();
        let obj = Object::new(&BASE_TYPE, None, None).unwrap();
        assert_eq!(filter.test(&obj), FilterResult::Error);
        obj.release().unwrap();
        filter.release().unwrap();
    }

    #[test]
    fn test_dead_filter_is_error() {
        let filter = Filter::new(Box::new(VerdictBackend(FilterResult::Pass)), None, None, None)
            .unwrap();
        let obj = Object::new(&BASE_TYPE, None, None).unwrap();
        assert_eq!(filter.test(&obj), FilterResult::Pass);

        filter.release().unwrap();
        assert_eq!(filter.test(&obj), FilterResult::Error);
        assert!(Filter::from_object(filter.as_object()).is_none());
        obj.release().unwrap();
    }

    #[test]
    fn test_teardown_releases_backend_object() {
        let backend_obj = Object::new(&BASE_TYPE, None, None).unwrap();
        let filter = Filter::new(
            Box::new(VerdictBackend(FilterResult::Drop)),
            Some(&backend_obj),
            None,
            None,
        )
        .unwrap();
        assert_eq!(backend_obj.strong_count(), 2);

        filter.release().unwrap();
        assert_eq!(backend_obj.strong_count(), 1);
        backend_obj.release().unwrap();
    }
}
