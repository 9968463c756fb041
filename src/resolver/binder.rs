//! Cross-process services: binder objects and the service manager.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::resolver::errors::BinderError;

/// Transaction flag: do not wait for a reply.
pub const FLAG_ONEWAY: u32 = 0x01;

/// A remote object that accepts transactions.
pub trait Binder: Send + Sync {
    /// Perform a synchronous transaction and return the reply.
    fn transact(&self, code: u32, data: &[u8], flags: u32) -> Result<Vec<u8>, BinderError>;

    fn is_alive(&self) -> bool;
}

/// Looks up registered services by name.
pub trait ServiceManager: Send + Sync {
    fn get_service(&self, name: &str) -> Option<Arc<dyn Binder>>;

    /// Block until `name` is registered or `timeout` passes.
    fn wait_for_service(&self, name: &str, timeout: Duration) -> Option<Arc<dyn Binder>>;

    fn list_services(&self) -> Vec<String>;
}

type Handler = Box<dyn Fn(u32, &[u8]) -> Result<Vec<u8>, BinderError> + Send + Sync>;

/// A binder served by a closure in this process.
pub struct LocalBinder {
    handler: Handler,
    alive: AtomicBool,
}

impl LocalBinder {
    pub fn new(
        handler: impl Fn(u32, &[u8]) -> Result<Vec<u8>, BinderError> + Send + Sync + 'static,
    ) -> Self {
        LocalBinder {
            handler: Box::new(handler),
            alive: AtomicBool::new(true),
        }
    }

    /// Mark the hosting process as gone.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl fmt::Debug for LocalBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBinder")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Binder for LocalBinder {
    fn transact(&self, code: u32, data: &[u8], _flags: u32) -> Result<Vec<u8>, BinderError> {
        if !self.is_alive() {
            return Err(BinderError::DeadObject);
        }
        (self.handler)(code, data)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// In-process service registry.
#[derive(Default)]
pub struct LocalServiceManager {
    services: Mutex<BTreeMap<String, Arc<dyn Binder>>>,
    registered: Condvar,
}

impl LocalServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, name: impl Into<String>, binder: Arc<dyn Binder>) {
        let name = name.into();
        tracing::debug!("registered service {}", name);
        self.lock().insert(name, binder);
        self.registered.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<dyn Binder>>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ServiceManager for LocalServiceManager {
    fn get_service(&self, name: &str) -> Option<Arc<dyn Binder>> {
        self.lock().get(name).cloned()
    }

    fn wait_for_service(&self, name: &str, timeout: Duration) -> Option<Arc<dyn Binder>> {
        // A timeout too large to represent waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut services = self.lock();
        loop {
            if let Some(binder) = services.get(name) {
                return Some(binder.clone());
            }
            services = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!("timed out waiting for {}", name);
                        return None;
                    }
                    self.registered
                        .wait_timeout(services, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .registered
                    .wait(services)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    fn list_services(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn echo() -> Arc<LocalBinder> {
        Arc::new(LocalBinder::new(|code, data| {
            let mut reply = code.to_le_bytes().to_vec();
            reply.extend_from_slice(data);
            Ok(reply)
        }))
    }

    #[test]
    fn test_get_service() {
        let sm = LocalServiceManager::new();
        assert!(sm.get_service("a.b@1.0::IFoo/default").is_none());

        sm.add_service("a.b@1.0::IFoo/default", echo());
        let binder = sm.get_service("a.b@1.0::IFoo/default").unwrap();
        assert_eq!(binder.transact(1, b"x", 0).unwrap(), vec![1, 0, 0, 0, b'x']);
        assert_eq!(sm.list_services(), vec!["a.b@1.0::IFoo/default".to_string()]);
    }

    #[test]
    fn test_wait_for_service_times_out() {
        let sm = LocalServiceManager::new();
        let start = Instant::now();
        assert!(sm
            .wait_for_service("a.b@1.0::IFoo/default", Duration::from_millis(30))
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_for_service_wakes_on_registration() {
        let sm = Arc::new(LocalServiceManager::new());
        let registrar = {
            let sm = sm.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sm.add_service("a.b@1.0::IFoo/default", echo());
            })
        };
        let binder = sm.wait_for_service("a.b@1.0::IFoo/default", Duration::from_secs(10));
        registrar.join().unwrap();
        assert!(binder.is_some());
    }

    #[test]
    fn test_wait_for_service_with_unbounded_timeout() {
        let sm = Arc::new(LocalServiceManager::new());
        let registrar = {
            let sm = sm.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sm.add_service("a.b@1.0::IFoo/default", echo());
            })
        };
        let binder = sm.wait_for_service("a.b@1.0::IFoo/default", Duration::MAX);
        registrar.join().unwrap();
        assert!(binder.is_some());
    }

    #[test]
    fn test_dead_binder_fails_transactions() {
        let binder = echo();
        binder.kill();
        assert_eq!(binder.transact(1, &[], 0), Err(BinderError::DeadObject));
    }
}
