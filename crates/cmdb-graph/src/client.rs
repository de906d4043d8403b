//! Neo4j connection management and shared graph client.

use neo4rs::{ConfigBuilder, Graph, Query};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Node not found: {label} with id {id}")]
    NotFound { label: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            max_connections: 16,
            fetch_size: 500,
        }
    }
}

impl From<&cmdb_core::config::Neo4jConfig> for GraphConfig {
    fn from(c: &cmdb_core::config::Neo4jConfig) -> Self {
        Self {
            uri: c.uri.clone(),
            user: c.user.clone(),
            password: c.password.clone(),
            max_connections: c.max_connections,
            fetch_size: c.fetch_size,
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Run a query that ends in `RETURN count(..) AS cnt`.
    pub(crate) async fn query_count(&self, query: Query) -> Result<i64, GraphError> {
        match self.query_one(query).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Create the uniqueness constraints the catalog and audit log rely on.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        const STATEMENTS: [&str; 4] = [
            "CREATE CONSTRAINT feature_pack_name IF NOT EXISTS
             FOR (p:FeaturePack) REQUIRE p.name IS UNIQUE",
            "CREATE CONSTRAINT type_definition_label IF NOT EXISTS
             FOR (t:TypeDefinition) REQUIRE t.label IS UNIQUE",
            "CREATE CONSTRAINT audit_entry_id IF NOT EXISTS
             FOR (e:AuditLogEntry) REQUIRE e.id IS UNIQUE",
            "CREATE INDEX audit_entry_node IF NOT EXISTS
             FOR (e:AuditLogEntry) ON (e.node_id)",
        ];
        for stmt in STATEMENTS {
            self.run(neo4rs::query(stmt)).await?;
        }
        tracing::debug!("Graph schema ensured");
        Ok(())
    }

    /// Uniqueness constraint on `id` for one node label.
    pub async fn ensure_label_schema(&self, label: &cmdb_core::types::Label) -> Result<(), GraphError> {
        let cypher = format!(
            "CREATE CONSTRAINT node_id_{name} IF NOT EXISTS
             FOR (n:`{label}`) REQUIRE n.id IS UNIQUE",
            name = label.as_str().to_lowercase(),
        );
        self.run(neo4rs::query(&cypher)).await
    }
}
