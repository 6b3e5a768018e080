//! DynamoDB backed implementation of the storage gateway.
//!
//! Items are converted between JSON objects and DynamoDB attribute maps with `serde_dynamo`.
//! Conditions become condition expressions; all attribute names go through placeholders so that
//! reserved words never collide with the schema.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `AGORA_ENVIRONMENT` | Selects the table, see [`crate::config`] |
//! | `DYNAMO_TABLE_NAME` | Overrides the table name |
//! | `AWS_*` | Region and credentials via the default provider chain |

use crate::config;
use crate::error::{ErrorKind, ForumError, ResultExt};
use crate::keys::{ATTR_PK, ATTR_SK, PrimaryKey};
use crate::store::{
    Condition, IndexQuery, Item, ItemStore, Page, PageToken, ScanFilter, require_primary_key,
};
use anyhow::Context;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue, ReturnValuesOnConditionCheckFailure};
use serde_json::Value;
use std::collections::HashMap;

/// Table definition helpers.
pub mod schema;

pub use schema::create_forum_table;

type DynamoItem = HashMap<String, AttributeValue>;

/// Single-table store backed by DynamoDB.
#[derive(Clone, Debug)]
pub struct DynamoItemStore {
    /// The underlying AWS SDK DynamoDB client.
    pub client: Client,
    table_name: String,
}

impl DynamoItemStore {
    /// Creates a store for the table selected by the environment.
    ///
    /// Loads AWS credentials and region from the default provider chain.
    pub async fn from_env() -> anyhow::Result<DynamoItemStore> {
        tracing::info!("Setting up DynamoDB....");
        let table_name = config::table_name()?;
        let config = aws_config::load_from_env().await;

        Ok(DynamoItemStore::new(Client::new(&config), table_name))
    }

    /// Creates a store for a fixed table and region, ignoring `AGORA_ENVIRONMENT`.
    pub async fn for_region(table_name: &str, region: &str) -> DynamoItemStore {
        tracing::info!(
            "Setting up DynamoDB for table '{}' in {}...",
            table_name,
            region
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        DynamoItemStore::new(Client::new(&config), table_name)
    }

    pub fn new(client: Client, table_name: impl Into<String>) -> DynamoItemStore {
        DynamoItemStore {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// Maps an SDK failure onto the error taxonomy.
fn classify<E>(err: SdkError<E, HttpResponse>, operation: &str) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::ConstructionFailure(_) => ErrorKind::Validation,
        SdkError::ServiceError(_) => match err.code() {
            Some("ConditionalCheckFailedException") => ErrorKind::ConditionFailed,
            Some(
                "ProvisionedThroughputExceededException"
                | "ThrottlingException"
                | "RequestLimitExceeded",
            ) => ErrorKind::Throttled,
            Some("ValidationException") => ErrorKind::Validation,
            _ => ErrorKind::StoreUnavailable,
        },
        _ => ErrorKind::StoreUnavailable,
    };

    let message = format!(
        "DynamoDB {} failed: {}",
        operation,
        DisplayErrorContext(&err)
    );
    anyhow::Error::new(err).context(ForumError::new(kind, message))
}

fn to_dynamo_item(item: &Item) -> anyhow::Result<DynamoItem> {
    serde_dynamo::aws_sdk_dynamodb_1::to_item(item)
        .context("Error serializing item into DynamoDB attributes")
        .mark_invalid()
}

fn from_dynamo_item(item: DynamoItem) -> anyhow::Result<Item> {
    serde_dynamo::aws_sdk_dynamodb_1::from_item(item)
        .context("Failed to deserialize DynamoDB item")
}

fn to_attribute_value(value: &Value) -> anyhow::Result<AttributeValue> {
    serde_dynamo::aws_sdk_dynamodb_1::to_attribute_value(value)
        .context("Error serializing attribute value")
        .mark_invalid()
}

fn key_attributes(key: &PrimaryKey) -> DynamoItem {
    HashMap::from([
        (ATTR_PK.to_string(), AttributeValue::S(key.pk.clone())),
        (ATTR_SK.to_string(), AttributeValue::S(key.sk.clone())),
    ])
}

/// Collects placeholder names and values while rendering expressions.
#[derive(Default)]
struct Expression {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Expression {
    fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn condition(&mut self, condition: &Condition) -> anyhow::Result<String> {
        Ok(match condition {
            Condition::ItemMissing => format!("attribute_not_exists({})", self.name(ATTR_PK)),
            Condition::ItemExists => format!("attribute_exists({})", self.name(ATTR_PK)),
            Condition::AttributeEquals { name, value } => {
                let name = self.name(name);
                let value = self.value(to_attribute_value(value)?);
                format!("{} = {}", name, value)
            }
            Condition::AttributeMissing { name } => {
                let pk = self.name(ATTR_PK);
                let name = self.name(name);
                format!("attribute_exists({}) AND attribute_not_exists({})", pk, name)
            }
        })
    }

    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

fn to_token(key: Option<DynamoItem>) -> anyhow::Result<Option<PageToken>> {
    key.map(|key| from_dynamo_item(key).map(PageToken))
        .transpose()
}

fn from_token(token: Option<PageToken>) -> anyhow::Result<Option<DynamoItem>> {
    token.map(|token| to_dynamo_item(&token.0)).transpose()
}

fn to_page(items: Option<Vec<DynamoItem>>, last_key: Option<DynamoItem>) -> anyhow::Result<Page> {
    Ok(Page {
        items: items
            .unwrap_or_default()
            .into_iter()
            .map(from_dynamo_item)
            .collect::<anyhow::Result<Vec<_>>>()?,
        next: to_token(last_key)?,
    })
}

#[async_trait]
impl ItemStore for DynamoItemStore {
    async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(key_attributes(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| classify(err, "GetItem"))?;

        output.item.map(from_dynamo_item).transpose()
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()> {
        let key = require_primary_key(&item)?;
        let mut expression = Expression::default();
        let condition_expression = condition
            .as_ref()
            .map(|condition| expression.condition(condition))
            .transpose()?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_dynamo_item(&item)?))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(expression.names())
            .set_expression_attribute_values(expression.values())
            .send()
            .await
            .map_err(|err| classify(err, "PutItem"))
            .with_context(|| format!("Failed to put item {}/{}", key.pk, key.sk))?;

        Ok(())
    }

    async fn update_item(
        &self,
        key: &PrimaryKey,
        attributes: Item,
        condition: Option<Condition>,
    ) -> anyhow::Result<Item> {
        if attributes.contains_key(ATTR_PK) || attributes.contains_key(ATTR_SK) {
            crate::forum_bail!(ErrorKind::Validation, "Primary key attributes cannot be updated");
        }
        if attributes.is_empty() {
            crate::forum_bail!(ErrorKind::Validation, "An update needs at least one attribute");
        }

        let mut expression = Expression::default();
        let mut assignments = Vec::with_capacity(attributes.len());
        for (name, value) in &attributes {
            let name = expression.name(name);
            let value = expression.value(to_attribute_value(value)?);
            assignments.push(format!("{} = {}", name, value));
        }
        let update_expression = format!("SET {}", assignments.join(", "));

        let exists = format!("attribute_exists({})", expression.name(ATTR_PK));
        let condition_expression = match &condition {
            Some(condition) => format!("{} AND ({})", exists, expression.condition(condition)?),
            None => exists,
        };

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(key_attributes(key)))
            .update_expression(update_expression)
            .condition_expression(condition_expression)
            .set_expression_attribute_names(expression.names())
            .set_expression_attribute_values(expression.values())
            .return_values(ReturnValue::AllNew)
            .return_values_on_condition_check_failure(ReturnValuesOnConditionCheckFailure::AllOld)
            .send()
            .await;

        match result {
            Ok(output) => from_dynamo_item(output.attributes.unwrap_or_default()),
            Err(err) => {
                // The old image is only returned if the item exists.
                let item_missing = match err.as_service_error() {
                    Some(UpdateItemError::ConditionalCheckFailedException(failure)) => {
                        failure.item().is_none()
                    }
                    _ => false,
                };

                if item_missing {
                    crate::forum_bail!(
                        ErrorKind::NotFound,
                        "No item exists for {}/{}",
                        key.pk,
                        key.sk
                    );
                }

                Err(classify(err, "UpdateItem"))
                    .with_context(|| format!("Failed to update item {}/{}", key.pk, key.sk))
            }
        }
    }

    async fn delete_item(&self, key: &PrimaryKey) -> anyhow::Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(key_attributes(key)))
            .send()
            .await
            .map_err(|err| classify(err, "DeleteItem"))
            .with_context(|| format!("Failed to delete item {}/{}", key.pk, key.sk))?;

        Ok(())
    }

    async fn query_page(
        &self,
        query: &IndexQuery,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        let mut expression = Expression::default();
        let partition = expression.name(query.index.partition_attribute());
        let partition_value = expression.value(AttributeValue::S(query.partition.clone()));
        let mut key_condition = format!("{} = {}", partition, partition_value);
        if let Some(prefix) = &query.sort_prefix {
            let sort = expression.name(query.index.sort_attribute());
            let prefix = expression.value(AttributeValue::S(prefix.clone()));
            key_condition = format!("{} AND begins_with({}, {})", key_condition, sort, prefix);
        }

        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(query.index.name())
            .key_condition_expression(key_condition)
            .set_expression_attribute_names(expression.names())
            .set_expression_attribute_values(expression.values())
            .limit(query.page_size)
            .set_exclusive_start_key(from_token(start)?)
            .send()
            .await
            .map_err(|err| classify(err, "Query"))
            .with_context(|| {
                format!(
                    "Error querying index {} for '{}'",
                    query.index.name(),
                    query.partition
                )
            })?;

        to_page(output.items, output.last_evaluated_key)
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        let mut expression = Expression::default();
        let pk = expression.name(ATTR_PK);
        let prefix = expression.value(AttributeValue::S(filter.pk_prefix.clone()));
        let mut filter_expression = format!("begins_with({}, {})", pk, prefix);
        if let Some(expected) = &filter.sk {
            let sk = expression.name(ATTR_SK);
            let expected = expression.value(AttributeValue::S(expected.clone()));
            filter_expression = format!("{} AND {} = {}", filter_expression, sk, expected);
        }

        let output = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression(filter_expression)
            .set_expression_attribute_names(expression.names())
            .set_expression_attribute_values(expression.values())
            .limit(filter.page_size)
            .set_exclusive_start_key(from_token(start)?)
            .send()
            .await
            .map_err(|err| classify(err, "Scan"))
            .with_context(|| format!("Error scanning table '{}'", self.table_name))?;

        to_page(output.items, output.last_evaluated_key)
    }
}
