//! Capability lifecycle actor.
//!
//! A single task owns the capability state. Requests from the gateway
//! (through `LifecycleHandle`) and commands from bus consumers are processed
//! one at a time, so enable, disable, unlock and key override never
//! interleave even though each may await network or disk I/O. After every
//! change the actor publishes a new `Snapshot` on a watch channel.


use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::bus::{CommandReceiver, ConsumerId, Envelope, MessageBus};
use crate::capability::{Capability, CapabilityError, CapabilityLoader, KeyMaterial};
use crate::messages::{Command, Notification};
use crate::settings::{SettingsError, SettingsStore};
use crate::state::{CapabilityState, Snapshot, Unlocked};

/// Capacity of the request mailbox.
const MAILBOX_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Capability is not enabled")]
    NotEnabled,
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    InvalidKey(String),
    #[error("Lifecycle manager has stopped")]
    Stopped,
}

type Reply<T> = oneshot::Sender<Result<T, LifecycleError>>;

enum Request {
    SetEnabled {
        enabled: bool,
        reply: Reply<bool>,
    },
    Unlock {
        passphrase: Zeroizing<String>,
        reply: Reply<String>,
    },
}

/// Cloneable handle to the actor.
#[derive(Clone)]
pub struct LifecycleHandle {
    requests: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
}

impl LifecycleHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, LifecycleError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .await
            .map_err(|_| LifecycleError::Stopped)?;
        rx.await.map_err(|_| LifecycleError::Stopped)?
    }

    /// Enable or disable the capability. Returns the resulting enabled flag.
    pub async fn set_enabled(&self, enabled: bool) -> Result<bool, LifecycleError> {
        self.call(|reply| Request::SetEnabled { enabled, reply })
            .await
    }

    /// Unlock with a passphrase. Returns the key ID.
    pub async fn unlock(&self, passphrase: Zeroizing<String>) -> Result<String, LifecycleError> {
        self.call(|reply| Request::Unlock { passphrase, reply }).await
    }
}

pub struct LifecycleManager {
    loader: Arc<dyn CapabilityLoader>,
    /// Loaded runtime; kept across disable so re-enabling does not reload.
    runtime: Option<Arc<dyn Capability>>,
    settings: SettingsStore,
    bus: MessageBus,
    snapshots: watch::Sender<Arc<Snapshot>>,
    requests: mpsc::Receiver<Request>,
    commands: CommandReceiver,
}

impl LifecycleManager {
    /// Start the actor. It runs until every `LifecycleHandle` is dropped.
    ///
    /// The persisted enabled flag is restored before any request is served.
    pub fn spawn(
        loader: Arc<dyn CapabilityLoader>,
        settings: SettingsStore,
        bus: MessageBus,
        commands: CommandReceiver,
    ) -> (LifecycleHandle, JoinHandle<()>) {
        let (requests_tx, requests) = mpsc::channel(MAILBOX_SIZE);
        let (snapshots, snapshots_rx) = watch::channel(Arc::new(Snapshot::initial()));

        let mut manager = Self {
            loader,
            runtime: None,
            settings,
            bus,
            snapshots,
            requests,
            commands,
        };
        let task = tokio::spawn(async move { manager.run().await });

        let handle = LifecycleHandle {
            requests: requests_tx,
            snapshots: snapshots_rx,
        };
        (handle, task)
    }

    async fn run(&mut self) {
        self.startup().await;

        let mut commands_open = true;
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                envelope = self.commands.recv(), if commands_open => match envelope {
                    Some(envelope) => self.handle_command(envelope).await,
                    None => commands_open = false,
                },
            }
        }
        log::info!("Lifecycle manager stopped");
    }

    async fn startup(&mut self) {
        let persisted = match self.settings.wasm_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                log::error!("Cannot read persisted capability state: {}", e);
                false
            }
        };
        if persisted {
            if let Err(e) = self.set_enabled(true).await {
                log::error!("Failed to enable capability at startup: {}", e);
            }
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    fn publish(&self, state: CapabilityState) {
        let snapshot = Snapshot {
            version: self.current().version + 1,
            state,
        };
        log::info!(
            "Capability {} (snapshot {})",
            snapshot.status().label(),
            snapshot.version
        );
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    async fn handle_request(&mut self, request: Request) {
        // A dropped reply receiver only means the caller went away.
        match request {
            Request::SetEnabled { enabled, reply } => {
                let _ = reply.send(self.set_enabled(enabled).await);
            }
            Request::Unlock { passphrase, reply } => {
                let _ = reply.send(self.unlock(&passphrase).await);
            }
        }
    }

    async fn handle_command(&mut self, envelope: Envelope) {
        let Envelope { from, command } = envelope;
        log::debug!("Command from consumer {}: {:?}", from, command);

        match command {
            Command::Connected => {
                self.reply_theme(from).await;
                self.reply_wasm(from);
            }
            Command::GetWasm => self.reply_wasm(from),
            Command::SetWasm { enabled } => {
                self.bus.broadcast(Notification::Off);
                if let Err(e) = self.set_enabled(enabled).await {
                    log::error!("Failed to set capability enabled={}: {}", enabled, e);
                }
            }
            Command::GetTheme => self.reply_theme(from).await,
            Command::SetTheme { theme } => {
                if let Err(e) = self.settings.set_theme(&theme).await {
                    log::error!("Failed to persist theme: {}", e);
                }
                self.bus.broadcast(Notification::Theme { theme });
            }
            Command::SetMasterKey { master_key, key_id } => {
                if let Err(e) = self.set_master_key(KeyMaterial::new(master_key), key_id) {
                    log::warn!("Master key override rejected: {}", e);
                    let error = e.to_string();
                    self.bus.post(from, Notification::Error { error });
                }
            }
        }
    }

    fn reply_wasm(&self, to: ConsumerId) {
        let enabled = self.current().is_enabled();
        self.bus.post(to, Notification::Wasm { enabled });
    }

    async fn reply_theme(&self, to: ConsumerId) {
        let theme = match self.settings.theme().await {
            Ok(theme) => theme,
            Err(e) => {
                log::error!("Cannot read theme: {}", e);
                String::new()
            }
        };
        self.bus.post(to, Notification::Theme { theme });
    }

    /// Transition, then tell every consumer the resulting status.
    async fn set_enabled(&mut self, enable: bool) -> Result<bool, LifecycleError> {
        let result = self.transition(enable).await;
        let enabled = self.current().is_enabled();
        self.bus.broadcast(Notification::Wasm { enabled });
        result.map(|_| enabled)
    }

    async fn transition(&mut self, enable: bool) -> Result<(), LifecycleError> {
        let enabled = self.current().is_enabled();
        if enable && !enabled {
            self.publish(CapabilityState::Enabling);
            let capability = match self.load_runtime().await {
                Ok(capability) => capability,
                Err(e) => {
                    self.publish(CapabilityState::Disabled);
                    return Err(e.into());
                }
            };
            self.publish(CapabilityState::Enabled {
                capability,
                unlocked: None,
            });
        } else if !enable && enabled {
            if let Some(capability) = self.current().capability() {
                capability.forget_keys();
            }
            // Drops key, key ID and index together.
            self.publish(CapabilityState::Disabled);
        }

        self.settings.set_wasm_enabled(enable).await.map_err(|e| {
            log::error!("Failed to persist capability state: {}", e);
            LifecycleError::from(e)
        })
    }

    async fn load_runtime(&mut self) -> Result<Arc<dyn Capability>, CapabilityError> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.clone());
        }
        let runtime = self.loader.load().await?;
        self.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    async fn unlock(&mut self, passphrase: &str) -> Result<String, LifecycleError> {
        let capability = self
            .current()
            .capability()
            .cloned()
            .ok_or(LifecycleError::NotEnabled)?;

        let unlocked = capability.unlock(passphrase).await?;
        let key_id = unlocked.key_id.clone();
        self.install_key(capability, unlocked.key, unlocked.key_id)?;
        Ok(key_id)
    }

    fn set_master_key(&mut self, key: KeyMaterial, key_id: String) -> Result<(), LifecycleError> {
        let capability = self
            .current()
            .capability()
            .cloned()
            .ok_or(LifecycleError::NotEnabled)?;
        self.install_key(capability, key, key_id)
    }

    /// Replace key, key ID and index in one snapshot, or change nothing.
    fn install_key(
        &mut self,
        capability: Arc<dyn Capability>,
        key: KeyMaterial,
        key_id: String,
    ) -> Result<(), LifecycleError> {
        if key.is_empty() {
            return Err(LifecycleError::InvalidKey(
                "Master key must not be empty".to_string(),
            ));
        }
        if key_id.is_empty() {
            return Err(LifecycleError::InvalidKey(
                "KeyId must not be empty".to_string(),
            ));
        }

        let index = capability.get_index(&key)?;
        capability.forget_keys();
        self.publish(CapabilityState::Enabled {
            capability,
            unlocked: Some(Unlocked { key, key_id, index }),
        });
        Ok(())
    }
}
