use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb as ddb;
use aws_sdk_dynamodb::model::AttributeValue;
use aws_sdk_sns as sns;
use chrono::{DateTime, Utc};
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use tracing::{debug, info};

const DDB_TABLE: &str = "DDB_TABLE";
const SNS_ARN: &str = "SNS_ARN";
const DYNAMODB_ENDPOINT: &str = "DYNAMODB_ENDPOINT";
const SNS_ENDPOINT: &str = "SNS_ENDPOINT";

pub const SUBJECT: &str = "ECR Image Push Notification";
pub const UNKNOWN: &str = "unknown";

/// The parts of an EventBridge image push event we care about. Everything
/// else in the payload is ignored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub detail: Option<PushDetail>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushDetail {
    pub repository: Option<String>,
    pub image_tag: Option<String>,
}

impl From<&Value> for PushEvent {
    fn from(value: &Value) -> Self {
        // Non-object details and non-string fields count as absent.
        let detail = value.get("detail")
            .and_then(Value::as_object)
            .map(|detail| PushDetail {
                repository: detail.get("repository").and_then(Value::as_str).map(str::to_owned),
                image_tag: detail.get("imageTag").and_then(Value::as_str).map(str::to_owned),
            });
        PushEvent { detail }
    }
}

impl PushEvent {
    pub fn repository(&self) -> &str {
        self.detail.as_ref()
            .and_then(|d| d.repository.as_deref())
            .unwrap_or(UNKNOWN)
    }

    pub fn image_tag(&self) -> &str {
        self.detail.as_ref()
            .and_then(|d| d.image_tag.as_deref())
            .unwrap_or(UNKNOWN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRecord {
    pub repository: String,
    pub image_tag: String,
    pub timestamp: String,
}

impl PushRecord {
    pub fn new(event: &PushEvent, now: DateTime<Utc>) -> PushRecord {
        PushRecord {
            repository: event.repository().to_string(),
            image_tag: event.image_tag().to_string(),
            timestamp: naive_utc_timestamp(now),
        }
    }

    pub fn item(&self) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (String::from("imageTag"), AttributeValue::S(self.image_tag.to_owned())),
            (String::from("repository"), AttributeValue::S(self.repository.to_owned())),
            (String::from("timestamp"), AttributeValue::S(self.timestamp.to_owned()))
        ])
    }

    pub fn message(&self) -> String {
        format!("Image pushed: {}:{} at {}", self.repository, self.image_tag, self.timestamp)
    }
}

/// ISO-8601 with microseconds and no zone designator, e.g. `2023-03-01T12:00:00.000000`.
pub fn naive_utc_timestamp(now: DateTime<Utc>) -> String {
    now.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResponse {
    pub status: String,
}

impl PushResponse {
    pub fn ok() -> PushResponse {
        PushResponse { status: String::from("ok") }
    }
}

/// Table and topic the handler writes to. Read on every invocation so a
/// missing variable only fails the call that needs it.
#[derive(Debug, Clone, Default)]
pub struct Targets {
    pub table_name: Option<String>,
    pub topic_arn: Option<String>,
}

impl Targets {
    pub fn from_env() -> Targets {
        Targets {
            table_name: env::var(DDB_TABLE).ok(),
            topic_arn: env::var(SNS_ARN).ok(),
        }
    }

    fn table_name(&self) -> Result<&str, Error> {
        self.table_name.as_deref()
            .ok_or_else(|| Error::from(format!("missing environment variable {}", DDB_TABLE)))
    }

    fn topic_arn(&self) -> Result<&str, Error> {
        self.topic_arn.as_deref()
            .ok_or_else(|| Error::from(format!("missing environment variable {}", SNS_ARN)))
    }
}

#[async_trait]
pub trait PushStore: Send + Sync {
    async fn put_record(&self, table_name: &str, record: &PushRecord) -> Result<(), Error>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<(), Error>;
}

#[async_trait]
impl PushStore for ddb::Client {
    async fn put_record(&self, table_name: &str, record: &PushRecord) -> Result<(), Error> {
        self.put_item()
            .set_table_name(Some(table_name.to_owned()))
            .set_item(Some(record.item()))
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for sns::Client {
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<(), Error> {
        let result = self.publish()
            .set_topic_arn(Some(topic_arn.to_owned()))
            .set_subject(Some(subject.to_owned()))
            .set_message(Some(message.to_owned()))
            .send()
            .await?;
        debug!("published message id {:?}", result.message_id());
        Ok(())
    }
}

/// Shared by every invocation in the process.
#[derive(Debug, Clone)]
pub struct Clients {
    pub ddb: ddb::Client,
    pub sns: sns::Client,
}

impl Clients {
    pub async fn from_env() -> Clients {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let config = aws_config::from_env().region(region_provider).load().await;
        let ddb_config = match env::var(DYNAMODB_ENDPOINT) {
            Ok(endpoint) => ddb::config::Builder::from(&config).endpoint_url(endpoint).build(),
            _ => ddb::config::Builder::from(&config).build()
        };
        let sns_config = match env::var(SNS_ENDPOINT) {
            Ok(endpoint) => sns::config::Builder::from(&config).endpoint_url(endpoint).build(),
            _ => sns::config::Builder::from(&config).build()
        };
        Clients {
            ddb: ddb::Client::from_conf(ddb_config),
            sns: sns::Client::from_conf(sns_config),
        }
    }
}

/// Logs the event, writes one record and publishes one notification. Nothing
/// is retried or deduplicated; store and publish failures go straight back to
/// the caller.
pub async fn record_push(
    payload: &Value,
    targets: &Targets,
    now: DateTime<Utc>,
    store: &dyn PushStore,
    notifier: &dyn Notifier
) -> Result<PushResponse, Error> {
    info!("Event received: {}", payload);
    let record = PushRecord::new(&PushEvent::from(payload), now);

    store.put_record(targets.table_name()?, &record).await?;
    debug!("wrote push record {}", serde_json::to_string(&record)?);

    notifier.publish(targets.topic_arn()?, SUBJECT, &record.message()).await?;
    Ok(PushResponse::ok())
}

pub async fn function_handler(event: LambdaEvent<Value>, clients: &Clients) -> Result<PushResponse, Error> {
    record_push(&event.payload, &Targets::from_env(), Utc::now(), &clients.ddb, &clients.sns).await
}
