use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Online/offline source consumed by the coordinator. The host feeds platform transitions
/// into it; the coordinator only ever sees the receiving side.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Receiver that only reports a state once it has held for `window`.
    pub fn debounced(&self, window: Duration) -> watch::Receiver<bool> {
        debounce(self.subscribe(), window)
    }
}

/// Forwards a value only after it has been stable for `window`, so flapping links do not
/// thrash the coordinator. Must be called inside a tokio runtime.
pub fn debounce(mut raw: watch::Receiver<bool>, window: Duration) -> watch::Receiver<bool> {
    let initial = *raw.borrow_and_update();
    let (tx, rx) = watch::channel(initial);
    tokio::spawn(async move {
        while raw.changed().await.is_ok() {
            loop {
                tokio::select! {
                    changed = raw.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(window) => break,
                }
            }
            let settled = *raw.borrow_and_update();
            let published = tx.send_if_modified(|current| {
                if *current == settled {
                    false
                } else {
                    *current = settled;
                    true
                }
            });
            if published {
                debug!(online = settled, "connectivity settled");
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    rx
}
