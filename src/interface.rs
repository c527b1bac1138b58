//! Interface base - the shared shape of backend-dispatched object kinds
//!
//! The three interface kinds (IO, filter, object handler) are one
//! allocation/teardown pattern instantiated with different dispatch traits:
//! an object whose payload couples a backend trait object with an optional
//! owned backend object. This module holds the shared piece — the owned
//! backend object slot and its construction/teardown contract.

use parking_lot::Mutex;

use crate::error::ObjectError;
use crate::object::Object;

/// The owned backend-object slot shared by every interface kind.
///
/// Construction takes a strong reference on the backend object; failure to
/// do so fails the whole construction. Teardown releases the reference
/// unless the backend's teardown hook already cleared or swapped it out, in
/// which case ownership of the cleanup is entirely the backend's.
pub struct InterfaceCore {
    backend_object: Mutex<Option<Object>>,
}

impl InterfaceCore {
    pub(crate) fn new(backend_object: Option<&Object>) -> Result<Self, ObjectError> {
        let held = match backend_object {
            Some(obj) => {
                obj.retain().map_err(|_| ObjectError::ConstructionFailed)?;
                Some(obj.clone())
            }
            None => None,
        };
        Ok(Self {
            backend_object: Mutex::new(held),
        })
    }

    /// Handle to the owned backend object, if any.
    pub fn backend_object(&self) -> Option<Object> {
        self.backend_object.lock().clone()
    }

    /// Swap the owned slot, returning the previous occupant. The caller is
    /// responsible for the reference balance on both sides: the new object
    /// must already be retained, the returned one must be released.
    pub fn replace_backend_object(&self, backend_object: Option<Object>) -> Option<Object> {
        std::mem::replace(&mut *self.backend_object.lock(), backend_object)
    }

    /// Clear the owned slot, returning the previous occupant still retained.
    pub fn take_backend_object(&self) -> Option<Object> {
        self.backend_object.lock().take()
    }

    /// Release the owned reference if the slot is still occupied. Called by
    /// kind teardown after the backend's teardown hook has run.
    pub(crate) fn release_backend_object(&self) {
        if let Some(obj) = self.take_backend_object() {
            let _ = obj.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::BASE_TYPE;

    #[test]
    fn test_construction_retains_backend_object() {
        let backend = Object::new(&BASE_TYPE, None, None).unwrap();
        let core = InterfaceCore::new(Some(&backend)).unwrap();
        assert_eq!(backend.strong_count(), 2);

        core.release_backend_object();
        assert_eq!(backend.strong_count(), 1);
        // Idempotent once cleared.
        core.release_backend_object();
        assert_eq!(backend.strong_count(), 1);

        backend.release().unwrap();
    }

    #[test]
    fn test_construction_fails_on_dead_backend_object() {
        let backend = Object::new(&BASE_TYPE, None, None).unwrap();
        backend.release().unwrap();
        assert!(matches!(
            InterfaceCore::new(Some(&backend)),
            Err(ObjectError::ConstructionFailed)
        ));
    }

    #[test]
    fn test_swap_out_transfers_ownership() {
        let backend = Object::new(&BASE_TYPE, None, None).unwrap();
        let core = InterfaceCore::new(Some(&backend)).unwrap();

        let taken = core.take_backend_object().unwrap();
        assert!(core.backend_object().is_none());
        taken.release().unwrap();

        core.release_backend_object();
        assert_eq!(backend.strong_count(), 1);
        backend.release().unwrap();
    }
}
