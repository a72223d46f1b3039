use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::database::FieldBound;
use crate::error::{Error, Result};
use crate::schema::Field;

/// Per-connection cache of field-bound instances. Construction runs under the
/// cache lock, so concurrent first requests for a field share one instance.
pub struct FieldCache<T: ?Sized> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for FieldCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized + FieldBound> FieldCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_insert(&self, field: &Arc<Field>, create: impl FnOnce() -> Result<Arc<T>>) -> Result<Arc<T>> {
        let instance = {
            let mut entries = self.entries.lock();
            match entries.get(&field.qualified_name()) {
                Some(existing) => existing.clone(),
                None => {
                    let created = create()?;
                    entries.insert(field.qualified_name(), created.clone());
                    created
                }
            }
        };
        if instance.field().as_ref() != field.as_ref() {
            return Err(Error::FieldMismatch {
                requested: field.qualified_name(),
                bound: instance.field().qualified_name(),
            });
        }
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
