/// A list of callbacks that are invoked in registration order whenever the
/// owner has an event to publish.
///
/// The payload is borrowed by each callback for the duration of the call only.
pub struct Observable<T: ?Sized> {
    callbacks: Vec<Box<dyn FnMut(&T) + Send>>,
}

impl<T: ?Sized> Default for Observable<T> {
    fn default() -> Self {
        Self { callbacks: vec![] }
    }
}

impl<T: ?Sized> Observable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn notify(&mut self, value: &T) {
        for callback in &mut self.callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn notifies_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::<u32>::new()));
        let mut observable = Observable::<u32>::new();
        for tag in 0..3u32 {
            let log = log.clone();
            observable.subscribe(move |value| {
                log.lock().unwrap().push(tag * 100 + *value);
            });
        }
        observable.notify(&7);
        assert_eq!(*log.lock().unwrap(), vec![7, 107, 207]);
    }

    #[test]
    fn empty_observable_is_a_noop() {
        let mut observable = Observable::<[u8]>::new();
        observable.notify(&[1, 2, 3]);
        assert!(observable.is_empty());
    }
}
