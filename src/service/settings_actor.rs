use crate::admin::{AdminCredentials, Subscription};
use crate::crypto::SecretCipher;
use crate::db::{DbVersion, SettingsStorage};
use crate::doctype::{Doc, Meta};
use crate::error::SettingsError;
use crate::settings::record::DEFAULT_ADMIN_ENDPOINT;
use crate::settings::validate::{FieldError, FieldErrorKind, ValidatedUpdate, ValidationErrors};
use crate::settings::{
    BankingSettings, FieldStates, Origin, SettingsView, field_states, preview, validate_update,
};

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound for one page of version history.
pub const MAX_VERSIONS: u32 = 100;

type Reply<T> = RpcReplyPort<Result<T, SettingsError>>;

/// Public messages handled by the settings actor.
#[derive(Debug)]
pub enum SettingsActorMessage {
    /// Current record with field states, created with defaults if missing.
    Get(Reply<SettingsView>),
    /// Typed view of the current record.
    Settings(Reply<BankingSettings>),
    /// Validate and persist a user submission.
    Update(Doc, Reply<SettingsView>),
    /// Field states for an unsaved draft.
    Preview(Doc, Reply<FieldStates>),
    /// Decrypted value of a `Password` field.
    GetPassword(String, Reply<Option<String>>),
    /// Credentials for the admin app; fails while the integration is off.
    AdminCredentials(Reply<AdminCredentials>),
    /// Cache a freshly fetched subscription.
    SetSubscription(Subscription, Reply<SettingsView>),
    /// Change history, newest first.
    Versions(u32, Reply<Vec<DbVersion>>),
}

/// Handle for interacting with the settings actor.
#[derive(Clone)]
pub struct SettingsHandle {
    actor: ActorRef<SettingsActorMessage>,
    meta: Arc<Meta>,
}

fn rpc_failed(op: &str, e: impl std::fmt::Display) -> SettingsError {
    SettingsError::RactorError(format!("{op} RPC failed: {e}"))
}

impl SettingsHandle {
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub async fn get(&self) -> Result<SettingsView, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::Get).map_err(|e| rpc_failed("Get", e))?
    }

    pub async fn settings(&self) -> Result<BankingSettings, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::Settings)
            .map_err(|e| rpc_failed("Settings", e))?
    }

    pub async fn update(&self, patch: Doc) -> Result<SettingsView, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::Update, patch)
            .map_err(|e| rpc_failed("Update", e))?
    }

    pub async fn preview(&self, draft: Doc) -> Result<FieldStates, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::Preview, draft)
            .map_err(|e| rpc_failed("Preview", e))?
    }

    pub async fn get_password(
        &self,
        fieldname: impl AsRef<str>,
    ) -> Result<Option<String>, SettingsError> {
        ractor::call!(
            self.actor,
            SettingsActorMessage::GetPassword,
            fieldname.as_ref().to_string()
        )
        .map_err(|e| rpc_failed("GetPassword", e))?
    }

    pub async fn admin_credentials(&self) -> Result<AdminCredentials, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::AdminCredentials)
            .map_err(|e| rpc_failed("AdminCredentials", e))?
    }

    pub async fn set_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<SettingsView, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::SetSubscription, subscription)
            .map_err(|e| rpc_failed("SetSubscription", e))?
    }

    pub async fn versions(&self, limit: u32) -> Result<Vec<DbVersion>, SettingsError> {
        ractor::call!(self.actor, SettingsActorMessage::Versions, limit)
            .map_err(|e| rpc_failed("Versions", e))?
    }
}

/// Internal state held by the settings actor.
struct SettingsActorState {
    meta: Arc<Meta>,
    storage: SettingsStorage,
    cipher: SecretCipher,
    /// Cached record; `None` until loaded or created.
    doc: Option<Doc>,
    modified: Option<DateTime<Utc>>,
    subscription: Option<Subscription>,
}

/// ractor-based owner of the single settings record.
struct SettingsActor;

#[ractor::async_trait]
impl Actor for SettingsActor {
    type Msg = SettingsActorMessage;
    type State = SettingsActorState;
    type Arguments = (Arc<Meta>, SettingsStorage, SecretCipher);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (meta, storage, cipher): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let stored = storage.load_single(&meta).await.map_err(|e| {
            ActorProcessingErr::from(format!("DB load of {} failed: {}", meta.name(), e))
        })?;

        let (doc, modified) = match stored {
            Some(stored) => {
                info!(doctype = meta.name(), "SettingsActor started from DB");
                (Some(stored.doc), stored.modified)
            }
            None => {
                info!(
                    doctype = meta.name(),
                    "SettingsActor started; record will be created on first access"
                );
                (None, None)
            }
        };

        Ok(SettingsActorState {
            meta,
            storage,
            cipher,
            doc,
            modified,
            subscription: None,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SettingsActorMessage::Get(rp) => {
                let res = state.view().await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::Settings(rp) => {
                let res = state.settings().await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::Update(patch, rp) => {
                let res = state.handle_update(patch).await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::Preview(draft, rp) => {
                let res = state.handle_preview(draft).await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::GetPassword(fieldname, rp) => {
                let res = state.password(&fieldname).await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::AdminCredentials(rp) => {
                let res = state.admin_credentials().await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::SetSubscription(subscription, rp) => {
                let res = state.handle_set_subscription(subscription).await;
                let _ = rp.send(res);
            }
            SettingsActorMessage::Versions(limit, rp) => {
                let res = state
                    .storage
                    .list_versions(state.meta.name(), limit.clamp(1, MAX_VERSIONS))
                    .await;
                let _ = rp.send(res);
            }
        }
        Ok(())
    }
}

impl SettingsActorState {
    /// The cached record, loading or creating it with defaults as needed.
    async fn current(&mut self) -> Result<&Doc, SettingsError> {
        if self.doc.is_none() {
            match self.storage.load_single(&self.meta).await? {
                Some(stored) => {
                    self.modified = stored.modified;
                    self.doc = Some(stored.doc);
                }
                None => {
                    let defaults = self.meta.defaults();
                    let modified = self
                        .storage
                        .save_single(&self.meta, &defaults, &[], None)
                        .await?;
                    info!(doctype = self.meta.name(), "record created with defaults");
                    self.modified = Some(modified);
                    self.doc = Some(defaults);
                }
            }
        }
        match self.doc.as_ref() {
            Some(doc) => Ok(doc),
            None => Err(SettingsError::Schema(format!(
                "{} record is unavailable",
                self.meta.name()
            ))),
        }
    }

    /// The record as shown to a form: stored values plus display-only
    /// content, and the field states that result.
    async fn view(&mut self) -> Result<SettingsView, SettingsError> {
        let mut doc = self.current().await?.clone();
        doc.extend(self.display_values()?);
        let field_states = field_states(&self.meta, &doc);
        Ok(SettingsView {
            doc,
            field_states,
            modified: self.modified,
        })
    }

    async fn settings(&mut self) -> Result<BankingSettings, SettingsError> {
        let mut settings = BankingSettings::from_doc(self.current().await?)?;
        settings.subscription = self.subscription.clone();
        Ok(settings)
    }

    /// Display-only content shown alongside the stored values.
    fn display_values(&self) -> Result<Doc, SettingsError> {
        let mut shown = Doc::new();
        if let Some(subscription) = self.subscription.as_ref() {
            shown.insert("subscription".to_string(), serde_json::to_value(subscription)?);
        }
        Ok(shown)
    }

    async fn handle_update(&mut self, mut patch: Doc) -> Result<SettingsView, SettingsError> {
        // a form posting back the whole view repeats display-only content as shown
        let shown = self.display_values()?;
        patch.retain(|fieldname, value| {
            let display_only = self.meta.field(fieldname).is_some_and(|f| {
                let fieldtype = f.field.fieldtype;
                !fieldtype.is_stored() && !fieldtype.is_layout()
            });
            !(display_only && shown.get(fieldname).unwrap_or(&Value::Null) == value)
        });

        let current = self.current().await?.clone();
        let update = validate_update(&self.meta, &current, &patch, Origin::User)?;
        self.persist(update).await?;
        self.view().await
    }

    async fn handle_preview(&mut self, draft: Doc) -> Result<FieldStates, SettingsError> {
        let current = self.current().await?.clone();
        Ok(preview(&self.meta, &current, &draft))
    }

    async fn persist(&mut self, update: ValidatedUpdate) -> Result<(), SettingsError> {
        let ValidatedUpdate {
            doc,
            secrets,
            changes,
        } = update;

        let secrets: Vec<(String, Option<String>)> = secrets
            .into_iter()
            .map(|(fieldname, plain)| {
                let token = plain.map(|p| self.cipher.encrypt(&p));
                (fieldname, token)
            })
            .collect();
        let history = self.meta.track_changes().then_some(changes.as_slice());

        let modified = self
            .storage
            .save_single(&self.meta, &doc, &secrets, history)
            .await?;

        let changed: Vec<&str> = changes.iter().map(|c| c.0.as_str()).collect();
        info!(doctype = self.meta.name(), changed = ?changed, "record saved");

        self.doc = Some(doc);
        self.modified = Some(modified);
        Ok(())
    }

    async fn password(&mut self, fieldname: &str) -> Result<Option<String>, SettingsError> {
        let is_secret = self
            .meta
            .field(fieldname)
            .is_some_and(|f| f.field.fieldtype.is_secret());
        if !is_secret {
            debug!(field = fieldname, "not a password field");
            return Ok(None);
        }
        let token = self
            .storage
            .get_password(self.meta.name(), self.meta.name(), fieldname)
            .await?;
        token.map(|t| self.cipher.decrypt(&t)).transpose()
    }

    async fn admin_credentials(&mut self) -> Result<AdminCredentials, SettingsError> {
        let settings = BankingSettings::from_doc(self.current().await?)?;
        if !settings.enabled {
            return Err(SettingsError::NotEnabled);
        }

        let customer_id = settings
            .customer_id
            .filter(|c| !c.is_empty())
            .ok_or_else(|| self.missing("customer_id"))?;
        let api_token = self
            .password("api_token")
            .await?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.missing("api_token"))?;
        let endpoint = settings
            .admin_endpoint
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ADMIN_ENDPOINT.to_string());

        Ok(AdminCredentials {
            endpoint,
            customer_id,
            api_token,
        })
    }

    fn missing(&self, fieldname: &str) -> SettingsError {
        match self.meta.field(fieldname) {
            Some(fm) => {
                ValidationErrors::from(FieldError::new(&fm.field, FieldErrorKind::Missing)).into()
            }
            None => SettingsError::Schema(format!("unknown field `{fieldname}`")),
        }
    }

    async fn handle_set_subscription(
        &mut self,
        subscription: Subscription,
    ) -> Result<SettingsView, SettingsError> {
        let settings = BankingSettings::from_doc(self.current().await?)?;

        if let Some(license) = subscription.fintech_license.as_ref() {
            if settings.enable_ebics {
                let mut patch = Doc::new();
                if self.password("fintech_license_key").await?.as_deref()
                    != Some(license.key.as_str())
                {
                    patch.insert("fintech_license_key".into(), json!(license.key));
                }
                patch.insert(
                    "fintech_licensee_name".into(),
                    Value::String(license.licensee_name.clone()),
                );

                let current = self.current().await?.clone();
                let update = validate_update(&self.meta, &current, &patch, Origin::System)?;
                if !update.changes.is_empty() {
                    info!(
                        licensee = %license.licensee_name,
                        "storing fintech license from subscription"
                    );
                    self.persist(update).await?;
                }
            } else {
                warn!("subscription carries a fintech license but EBICS is disabled; ignoring it");
            }
        }

        self.subscription = Some(subscription);
        self.view().await
    }
}

/// Spawn the settings actor for the Banking Settings DocType.
pub async fn spawn(
    storage: SettingsStorage,
    cipher: SecretCipher,
) -> Result<SettingsHandle, SettingsError> {
    spawn_with_meta(Meta::banking_settings()?, storage, cipher).await
}

/// Spawn the settings actor for any single DocType.
pub async fn spawn_with_meta(
    meta: Meta,
    storage: SettingsStorage,
    cipher: SecretCipher,
) -> Result<SettingsHandle, SettingsError> {
    if !meta.is_single() {
        return Err(SettingsError::Schema(format!(
            "{} is not a single DocType",
            meta.name()
        )));
    }
    let meta = Arc::new(meta);
    let (actor, _jh) = Actor::spawn(None, SettingsActor, (meta.clone(), storage, cipher))
        .await
        .map_err(|e| SettingsError::RactorError(format!("failed to spawn SettingsActor: {e}")))?;
    Ok(SettingsHandle { actor, meta })
}
