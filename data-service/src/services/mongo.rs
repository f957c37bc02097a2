use crate::config::MongoConfig;
use crate::models::{from_bson, to_bson, InsertedId, JsonDocument};
use crate::services::backend::{BackendError, StoreBackend};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, Credential, ServerAddress},
    Client as MongoClient, Collection,
};
use secrecy::ExposeSecret;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Clone)]
struct MongoSession {
    client: MongoClient,
    collection: Collection<Document>,
}

/// MongoDB-backed store. The session is the driver `Client`, which pools
/// connections internally and is shared by all concurrent requests.
pub struct MongoBackend {
    config: MongoConfig,
    connect_timeout: Duration,
    session: RwLock<Option<MongoSession>>,
}

impl MongoBackend {
    pub fn new(config: MongoConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            session: RwLock::new(None),
        }
    }

    async fn client_options(&self) -> Result<ClientOptions, BackendError> {
        let mut options = match &self.config.uri {
            Some(uri) => ClientOptions::parse(uri.expose_secret())
                .await
                .map_err(|e| BackendError::Operation(anyhow::Error::new(e)))?,
            None => {
                let mut options = ClientOptions::builder()
                    .hosts(vec![ServerAddress::Tcp {
                        host: self.config.host.clone(),
                        port: Some(self.config.port),
                    }])
                    .build();
                if let Some(username) = &self.config.username {
                    options.credential = Some(
                        Credential::builder()
                            .username(username.clone())
                            .password(
                                self.config
                                    .password
                                    .as_ref()
                                    .map(|p| p.expose_secret().clone()),
                            )
                            .source(self.config.auth_source.clone())
                            .build(),
                    );
                }
                options
            }
        };

        options.app_name = Some("data-service".to_string());
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);
        Ok(options)
    }

    fn current_session(&self) -> Result<MongoSession, BackendError> {
        self.session
            .read()
            .map_err(|_| BackendError::Operation(anyhow::anyhow!("session lock poisoned")))?
            .clone()
            .ok_or_else(|| BackendError::connectivity("no session established"))
    }

    async fn ping_session(&self, session: &MongoSession) -> Result<(), BackendError> {
        session
            .client
            .database(&self.config.auth_source)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Map driver errors onto connectivity, duplicate-key and operation failures.
fn classify(err: MongoError) -> BackendError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY_CODE {
            return BackendError::Duplicate(write_error.message.clone());
        }
    }

    let transient = matches!(
        *err.kind,
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
    ) || err.contains_label("RetryableWriteError");

    if transient {
        BackendError::Connectivity(anyhow::Error::new(err))
    } else {
        BackendError::Operation(anyhow::Error::new(err))
    }
}

#[async_trait]
impl StoreBackend for MongoBackend {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn open(&self) -> Result<(), BackendError> {
        // An existing client reconnects on its own; only verify reachability.
        if let Ok(session) = self.current_session() {
            return self.ping_session(&session).await;
        }

        tracing::info!(
            uri = %self.config.redacted_connection_string(),
            "Connecting to MongoDB"
        );

        let options = self.client_options().await?;
        let client = MongoClient::with_options(options)
            .map_err(|e| BackendError::Operation(anyhow::Error::new(e)))?;
        let collection = client
            .database(&self.config.database)
            .collection::<Document>(&self.config.collection);
        let session = MongoSession { client, collection };

        self.ping_session(&session).await?;

        let mut slot = self
            .session
            .write()
            .map_err(|_| BackendError::Operation(anyhow::anyhow!("session lock poisoned")))?;
        *slot = Some(session);

        tracing::info!(
            database = %self.config.database,
            collection = %self.config.collection,
            "Successfully connected to MongoDB"
        );
        Ok(())
    }

    async fn insert(&self, document: JsonDocument) -> Result<InsertedId, BackendError> {
        let session = self.current_session()?;
        let document = to_bson(&document);

        let result = session
            .collection
            .insert_one(document, None)
            .await
            .map_err(classify)?;

        Ok(InsertedId::from(result.inserted_id))
    }

    async fn list(&self) -> Result<Vec<JsonDocument>, BackendError> {
        let session = self.current_session()?;

        let cursor = session.collection.find(None, None).await.map_err(classify)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(classify)?;

        Ok(documents.into_iter().map(from_bson).collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let session = self.current_session()?;
        self.ping_session(&session).await
    }
}
