//! RSA key stack kept topped up by a background worker.
//!
//! RSA key generation is slow, so a [`StackedKeyProvider`] keeps up to `stack_size` keys ready.
//! Taking a key triggers a refill; at most one refill worker runs at a time. EC keys are cheap
//! and always generated on demand.

use super::{EcCurve, KeyError, PrivateKey};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeyProviderConfig {
    pub rsa_key_bits: usize,
    /// Number of RSA keys kept ready, 0 generates every key on demand
    pub stack_size: usize,
}

impl Default for KeyProviderConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: 2048,
            stack_size: 0,
        }
    }
}

struct Shared {
    config: KeyProviderConfig,
    keys: Mutex<VecDeque<PrivateKey>>,
    key_ready: Condvar,
    /// set while a refill worker is running, cleared by the worker under the `keys` lock
    refilling: AtomicBool,
    stopped: AtomicBool,
}

pub struct StackedKeyProvider {
    shared: Arc<Shared>,
}

impl fmt::Debug for StackedKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackedKeyProvider")
            .field("config", &self.shared.config)
            .field("ready_keys", &self.ready_keys())
            .finish()
    }
}

impl StackedKeyProvider {
    /// Creates the provider and starts filling the stack when stacking is enabled.
    pub fn new(config: KeyProviderConfig) -> Self {
        let provider = Self {
            shared: Arc::new(Shared {
                config,
                keys: Mutex::new(VecDeque::new()),
                key_ready: Condvar::new(),
                refilling: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        };

        if provider.shared.config.stack_size > 0 {
            provider.ensure_refill();
        }

        provider
    }

    pub fn config(&self) -> &KeyProviderConfig {
        &self.shared.config
    }

    /// Number of keys ready to be taken.
    pub fn ready_keys(&self) -> usize {
        self.shared.keys.lock().len()
    }

    /// Takes a RSA key from the stack.
    ///
    /// Blocks only while the stack is empty and a refill is in progress. If no worker can provide
    /// a key, the key is generated on the calling thread.
    pub fn acquire(&self) -> Result<PrivateKey, KeyError> {
        let shared = &self.shared;

        if shared.config.stack_size == 0 {
            return PrivateKey::generate_rsa(shared.config.rsa_key_bits);
        }

        let key = {
            let mut keys = shared.keys.lock();
            loop {
                if let Some(key) = keys.pop_front() {
                    break Some(key);
                }

                if !self.ensure_refill() {
                    break None;
                }

                shared.key_ready.wait(&mut keys);
            }
        };

        self.ensure_refill();

        match key {
            Some(key) => Ok(key),
            None => {
                log::warn!("RSA key stack is not available, generating key inline");
                PrivateKey::generate_rsa(shared.config.rsa_key_bits)
            }
        }
    }

    /// Generates a fresh EC key.
    pub fn generate_ec_key(&self, curve: EcCurve) -> PrivateKey {
        PrivateKey::generate_ec(curve)
    }

    /// Starts a refill worker unless one is running. Returns whether a worker is running.
    fn ensure_refill(&self) -> bool {
        let shared = &self.shared;

        if shared
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return true;
        }

        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("rsa-key-stack".to_owned())
            .spawn(move || refill(&worker_shared));

        match spawned {
            Ok(_) => true,
            Err(e) => {
                log::error!("Couldn't spawn RSA key stack worker: {e}");
                shared.refilling.store(false, Ordering::Release);
                false
            }
        }
    }
}

impl Drop for StackedKeyProvider {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

fn refill(shared: &Shared) {
    log::debug!("RSA key stack refill started");

    loop {
        {
            let keys = shared.keys.lock();
            if shared.stopped.load(Ordering::Acquire) || keys.len() >= shared.config.stack_size {
                shared.refilling.store(false, Ordering::Release);
                drop(keys);
                shared.key_ready.notify_all();
                break;
            }
        }

        match PrivateKey::generate_rsa(shared.config.rsa_key_bits) {
            Ok(key) => {
                shared.keys.lock().push_back(key);
                shared.key_ready.notify_one();
            }
            Err(e) => {
                log::error!("RSA key generation failed: {e}");
                let keys = shared.keys.lock();
                shared.refilling.store(false, Ordering::Release);
                drop(keys);
                shared.key_ready.notify_all();
                break;
            }
        }
    }

    log::debug!("RSA key stack refill stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::KeyType;
    use std::time::{Duration, Instant};

    fn small_stack(stack_size: usize) -> KeyProviderConfig {
        KeyProviderConfig {
            rsa_key_bits: 1024,
            stack_size,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(60);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn default_config() {
        let config = KeyProviderConfig::default();
        assert_eq!(config.rsa_key_bits, 2048);
        assert_eq!(config.stack_size, 0);

        use serde::de::value::{Error, MapDeserializer};
        let input = MapDeserializer::<_, Error>::new([("stackSize", 4usize)].into_iter());
        let parsed = KeyProviderConfig::deserialize(input).unwrap();
        assert_eq!(parsed, KeyProviderConfig { stack_size: 4, ..config });
    }

    #[test]
    fn ec_keys_on_demand() {
        let provider = StackedKeyProvider::new(KeyProviderConfig::default());
        let key = provider.generate_ec_key(EcCurve::NistP256);
        assert_eq!(key.ec_curve(), Some(EcCurve::NistP256));
        assert_eq!(provider.ready_keys(), 0);
    }

    // Generating RSA keys in debug is very slow. Therefore, following tests are ignored in debug builds

    #[test]
    #[cfg_attr(debug_assertions, ignore)]
    fn unstacked_provider_generates_inline() {
        let provider = StackedKeyProvider::new(small_stack(0));
        let key = provider.acquire().unwrap();
        assert_eq!(key.key_type(), KeyType::Rsa);
        assert_eq!(provider.ready_keys(), 0);
        assert!(!provider.shared.refilling.load(Ordering::Acquire));
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore)]
    fn stack_is_filled_and_topped_up() {
        let provider = StackedKeyProvider::new(small_stack(2));
        assert!(wait_until(|| provider.ready_keys() == 2));

        let key = provider.acquire().unwrap();
        assert_eq!(key.key_type(), KeyType::Rsa);

        assert!(wait_until(|| provider.ready_keys() == 2
            && !provider.shared.refilling.load(Ordering::Acquire)));
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore)]
    fn concurrent_acquire_yields_distinct_keys() {
        let provider = Arc::new(StackedKeyProvider::new(small_stack(1)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || provider.acquire().unwrap().to_public_key())
            })
            .collect();
        let public_keys: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        for (i, a) in public_keys.iter().enumerate() {
            for b in &public_keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore)]
    fn dropping_provider_stops_worker() {
        let provider = StackedKeyProvider::new(small_stack(64));
        let shared = Arc::clone(&provider.shared);
        drop(provider);

        assert!(shared.stopped.load(Ordering::Acquire));
        assert!(wait_until(|| !shared.refilling.load(Ordering::Acquire)));
        assert!(shared.keys.lock().len() < 64);
    }
}
