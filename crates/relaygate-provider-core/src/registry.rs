use std::collections::HashMap;
use std::sync::Arc;

use crate::adaptor::Adaptor;
use crate::channel::ApiType;

#[derive(Default)]
pub struct AdaptorRegistry {
    adaptors: HashMap<ApiType, Arc<dyn Adaptor>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adaptor: Arc<dyn Adaptor>) {
        self.adaptors.insert(adaptor.api_type(), adaptor);
    }

    /// `None` means no adaptor handles this API type.
    pub fn get(&self, api_type: ApiType) -> Option<Arc<dyn Adaptor>> {
        self.adaptors.get(&api_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.adaptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adaptors.is_empty()
    }
}
