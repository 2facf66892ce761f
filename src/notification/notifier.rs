use std::sync::atomic::{AtomicBool, Ordering};

use crate::notification::{RemovalCause, RemovalListener};

pub(crate) struct RemovalNotifier<V> {
    listener: RemovalListener<V>,
    is_enabled: AtomicBool,
    #[cfg(feature = "logging")]
    map_name: Option<String>,
}

impl<V> RemovalNotifier<V> {
    pub(crate) fn new(listener: RemovalListener<V>, _map_name: Option<String>) -> Self {
        Self {
            listener,
            is_enabled: AtomicBool::new(true),
            #[cfg(feature = "logging")]
            map_name: _map_name,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.is_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self, key: u32, value: V, cause: RemovalCause) {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        if !self.is_enabled() {
            return;
        }

        // A listener that panicked is never called again, so whatever state
        // it left behind is never observed through it.
        let result = catch_unwind(AssertUnwindSafe(|| (self.listener)(key, value, cause)));
        if let Err(_payload) = result {
            self.is_enabled.store(false, Ordering::Release);
            #[cfg(feature = "logging")]
            log_panic(&*_payload, self.map_name.as_deref());
        }
    }
}

#[cfg(feature = "logging")]
fn log_panic(payload: &(dyn std::any::Any + Send + 'static), map_name: Option<&str>) {
    // Try to downcast the payload into &str or String.
    let message: Option<std::borrow::Cow<'_, str>> =
        (payload.downcast_ref::<&str>().map(|s| (*s).into()))
            .or_else(|| payload.downcast_ref::<String>().map(Into::into));

    let mn = map_name.map(|name| format!("[{name}] ")).unwrap_or_default();

    if let Some(m) = message {
        log::error!("{mn}Disabled the removal listener because it panicked at '{m}'");
    } else {
        log::error!("{mn}Disabled the removal listener because it panicked");
    }
}
