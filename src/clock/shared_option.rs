use std::sync::{Arc, Mutex};

/// SharedOption is a slot that a timer handle fills and its background task drains.
#[derive(Clone, Default)]
pub(crate) struct SharedOption<T> {
    data: Arc<Mutex<Option<T>>>,
}

impl<T> SharedOption<T> {
    pub(crate) fn new() -> Self {
        SharedOption {
            data: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn replace(&self, new_data: T) -> Option<T> {
        self.data
            .lock()
            .expect("SharedOption.replace() mutex guard poison")
            .replace(new_data)
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.data.lock().expect("SharedOption.take() mutex guard poison").take()
    }

    pub(crate) fn is_some(&self) -> bool {
        self.data.lock().expect("SharedOption.is_some() mutex guard poison").is_some()
    }
}
