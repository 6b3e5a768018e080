//! Definition of the forum table: `PK`/`SK` plus the four secondary indexes.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = DynamoItemStore::from_env().await?;
//! create_forum_table(&store).await?;
//! ```

use crate::keys::{ATTR_PK, ATTR_SK, Index};
use crate::store::dynamo::DynamoItemStore;
use anyhow::Context;
use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::create_table::builders::CreateTableFluentBuilder;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType, TableStatus,
};
use std::time::Duration;
use tokio::time::sleep;

/// Creates a string attribute definition.
pub fn str_attribute(name: &str) -> Result<AttributeDefinition, BuildError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
}

/// Adds a composite primary key (hash + range) to the table.
pub fn with_range_index(
    builder: CreateTableFluentBuilder,
    hash_attribute: &str,
    range_attribute: &str,
) -> Result<CreateTableFluentBuilder, BuildError> {
    Ok(builder
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(hash_attribute)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(range_attribute)
                .key_type(KeyType::Range)
                .build()?,
        ))
}

/// Creates a GSI with composite key and full item projection.
///
/// Resolvers read entities straight from the index, so every attribute is projected.
pub fn replicated_range_index(index: Index) -> Result<GlobalSecondaryIndex, BuildError> {
    GlobalSecondaryIndex::builder()
        .index_name(index.name())
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(index.partition_attribute())
                .key_type(KeyType::Hash)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(index.sort_attribute())
                .key_type(KeyType::Range)
                .build()?,
        )
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
}

/// Applies the complete forum schema to a create table request.
pub fn forum_table_schema(
    builder: CreateTableFluentBuilder,
) -> Result<CreateTableFluentBuilder, BuildError> {
    let mut builder = builder
        .attribute_definitions(str_attribute(ATTR_PK)?)
        .attribute_definitions(str_attribute(ATTR_SK)?);
    for index in Index::ALL {
        builder = builder
            .attribute_definitions(str_attribute(index.partition_attribute())?)
            .attribute_definitions(str_attribute(index.sort_attribute())?);
    }

    let mut builder = with_range_index(builder, ATTR_PK, ATTR_SK)?;
    for index in Index::ALL {
        builder = builder.global_secondary_indexes(replicated_range_index(index)?);
    }

    Ok(builder.billing_mode(BillingMode::PayPerRequest))
}

/// Checks if the store's table exists (in any state).
pub async fn does_table_exist(store: &DynamoItemStore) -> anyhow::Result<bool> {
    match store
        .client
        .describe_table()
        .table_name(store.table_name())
        .send()
        .await
    {
        Ok(_) => Ok(true),
        Err(err)
            if err
                .as_service_error()
                .map(|e| e.is_resource_not_found_exception())
                .unwrap_or(false) =>
        {
            Ok(false)
        }
        Err(e) => Err(e).context(format!(
            "Cannot access DynamoDB table '{}'",
            store.table_name()
        )),
    }
}

/// Creates the forum table unless it already exists.
///
/// Waits for the table to become `ACTIVE` before returning (up to ~2.5 minutes).
pub async fn create_forum_table(store: &DynamoItemStore) -> anyhow::Result<()> {
    let table_name = store.table_name();

    if does_table_exist(store).await? {
        tracing::info!("Table '{}' already exists.", table_name);
        return Ok(());
    }

    tracing::info!("Table '{}' does not exist. Creating...", table_name);
    let _ = forum_table_schema(store.client.create_table().table_name(table_name))
        .with_context(|| {
            format!(
                "Failed to build proper create table request for: {}",
                table_name
            )
        })?
        .send()
        .await
        .with_context(|| format!("Failed to create DynamoDB table '{}'", table_name))?;

    tracing::info!("Create Table '{}' was submitted to DynamoDB", table_name);
    wait_until_table_becomes_active(store).await?;
    tracing::info!("Table '{}' was successfully created", table_name);

    Ok(())
}

async fn wait_until_table_becomes_active(store: &DynamoItemStore) -> anyhow::Result<()> {
    for _ in 0..15 {
        let resp = store
            .client
            .describe_table()
            .table_name(store.table_name())
            .send()
            .await
            .with_context(|| {
                format!("Failed to check table status of '{}'", store.table_name())
            })?;

        let status = resp
            .table()
            .and_then(|t| t.table_status())
            .unwrap_or(&TableStatus::Creating);

        if status == &TableStatus::Active {
            return Ok(());
        }

        sleep(Duration::from_secs(10)).await;
    }

    anyhow::bail!(
        "Table '{}' did not become ACTIVE in time",
        store.table_name()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_attribute_creates_string_type() {
        let attr = str_attribute("PK").unwrap();
        assert_eq!(attr.attribute_name(), "PK");
        assert_eq!(attr.attribute_type(), &ScalarAttributeType::S);
    }

    #[test]
    fn topic_index_projects_all_attributes() {
        let gsi = replicated_range_index(Index::PostsByTopic).unwrap();

        assert_eq!(gsi.index_name(), "GSI1");

        let keys: Vec<_> = gsi.key_schema().iter().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].attribute_name(), "GSI1PK");
        assert_eq!(keys[0].key_type(), &KeyType::Hash);
        assert_eq!(keys[1].attribute_name(), "GSI1SK");
        assert_eq!(keys[1].key_type(), &KeyType::Range);

        assert_eq!(
            gsi.projection().unwrap().projection_type(),
            Some(&ProjectionType::All)
        );
    }

    #[test]
    fn every_index_gets_its_own_key_attributes() {
        let names = Index::ALL
            .iter()
            .map(|index| replicated_range_index(*index).unwrap().index_name().to_string())
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["GSI1", "GSI2", "GSI3", "GSI4"]);
    }
}
