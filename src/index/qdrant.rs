//! Qdrant-backed vector index partitioned by document.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::Config;
use crate::index::VectorIndex;
use crate::index::payload::{build_payload, current_timestamp_rfc3339, parse_scored_chunk, parse_stored_chunk};
use crate::index::types::{
    CountResponse, IndexError, PointInsert, QueryResponse, QueryResponseResult, ScoredChunk,
    ScrollResponse, StoredChunk, rank_hits,
};

const SCROLL_PAGE_SIZE: usize = 512;

/// Vector index backed by a Qdrant collection over HTTP.
///
/// All documents share one collection; isolation comes from a mandatory
/// `document_id` payload filter on every search, fetch, count, and delete.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
    vector_size: u64,
}

impl QdrantIndex {
    /// Construct a new index client from configuration.
    pub fn new(config: &Config) -> Result<Self, IndexError> {
        let client = Client::builder()
            .user_agent("docpilot/index")
            .build()?;

        let base_url = normalize_base_url(&config.qdrant_url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.qdrant_collection_name,
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
            collection: config.qdrant_collection_name.clone(),
            vector_size: config.embedding_dimension as u64,
        })
    }

    /// Create the collection and payload indexes when they are missing.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        if !self.collection_exists().await? {
            tracing::debug!(
                collection = %self.collection,
                vector_size = self.vector_size,
                "Creating collection"
            );
            let body = json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine"
                }
            });
            let response = self
                .request(Method::PUT, &format!("collections/{}", self.collection))?
                .json(&body)
                .send()
                .await?;
            self.ensure_success(response, || {
                tracing::debug!(collection = %self.collection, "Collection created");
            })
            .await?;
        }
        self.ensure_payload_indexes().await
    }

    /// Ensure payload indexes exist for the per-document partition filter.
    async fn ensure_payload_indexes(&self) -> Result<(), IndexError> {
        let fields: [(&str, &str); 2] = [("document_id", "keyword"), ("chunk_index", "integer")];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(Method::PUT, &format!("collections/{}/index", self.collection))?
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, IndexError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), IndexError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    async fn delete_by_filter(&self, document_id: &str) -> Result<(), IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "filter": document_filter(document_id) }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(document_id, "Document vectors deleted");
        })
        .await
    }
}

fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            {
                "key": "document_id",
                "match": { "value": document_id }
            }
        ]
    })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, document_id: &str, points: Vec<PointInsert>) -> Result<usize, IndexError> {
        // Reprocessing replaces the document's whole partition; stale vectors
        // must never coexist with the new set.
        self.delete_by_filter(document_id).await?;

        if points.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let serialized: Vec<Value> = points
            .into_iter()
            .map(|point| {
                let payload = build_payload(document_id, &point, &now);
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": point.vector,
                    "payload": payload,
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(Method::PUT, &format!("collections/{}/points", self.collection))?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(document_id, points = point_count, "Points indexed");
        })
        .await?;

        Ok(point_count)
    }

    async fn search(
        &self,
        document_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let body = json!({
            "query": query,
            "limit": k,
            "with_payload": true,
            "filter": document_filter(document_id),
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(document_id, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let payload = point.payload.ok_or_else(|| {
                IndexError::MalformedPayload("search hit missing payload".to_string())
            })?;
            hits.push(parse_scored_chunk(&payload, point.score)?);
        }
        rank_hits(&mut hits);
        Ok(hits)
    }

    async fn fetch(&self, document_id: &str) -> Result<Vec<StoredChunk>, IndexError> {
        let mut offset: Option<Value> = None;
        let mut chunks = Vec::new();

        loop {
            let body = json!({
                "with_payload": true,
                "with_vector": false,
                "limit": SCROLL_PAGE_SIZE,
                "filter": document_filter(document_id),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/scroll", self.collection),
                )?
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::error!(document_id, error = %error, "Failed to scroll document chunks");
                return Err(error);
            }

            let ScrollResponse { result } = response.json().await?;
            for point in result.points {
                if let Some(payload) = point.payload {
                    chunks.push(parse_stored_chunk(&payload)?);
                }
            }

            match result.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn count(&self, document_id: &str) -> Result<usize, IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )?
            .json(&json!({
                "filter": document_filter(document_id),
                "exact": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::UnexpectedStatus { status, body });
        }

        let payload: CountResponse = response.json().await?;
        Ok(payload.result.count)
    }

    async fn delete(&self, document_id: &str) -> Result<(), IndexError> {
        self.delete_by_filter(document_id).await
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::payload::compute_chunk_hash;
    use httpmock::{Method::POST, MockServer};

    fn test_index(base_url: String) -> QdrantIndex {
        QdrantIndex {
            client: Client::builder()
                .user_agent("docpilot-test")
                .build()
                .expect("client"),
            base_url,
            api_key: None,
            collection: "documents".into(),
            vector_size: 2,
        }
    }

    fn sample_point(index: usize) -> PointInsert {
        let text = format!("chunk {index}");
        PointInsert {
            chunk_index: index,
            start_offset: index * 10,
            end_offset: index * 10 + 10,
            chunk_hash: compute_chunk_hash(&text),
            text,
            vector: vec![0.1, 0.2],
        }
    }

    #[tokio::test]
    async fn search_scopes_by_document_filter() {
        let server = MockServer::start_async().await;
        let index = test_index(server.base_url());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .body_contains("\"key\":\"document_id\"")
                    .body_contains("\"value\":\"doc-a\"");
                then.status(200).json_body(json!({
                    "result": [
                        {
                            "id": "11111111-1111-1111-1111-111111111111",
                            "score": 0.87,
                            "payload": {
                                "document_id": "doc-a",
                                "chunk_index": 1,
                                "start_offset": 10,
                                "end_offset": 20,
                                "text": "relevant passage",
                                "chunk_hash": "abc",
                                "timestamp": "2026-01-01T00:00:00Z"
                            }
                        }
                    ]
                }));
            })
            .await;

        let hits = index
            .search("doc-a", &[0.1, 0.2], 5)
            .await
            .expect("search hits");

        mock.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_index, 1);
        assert_eq!(hits[0].text, "relevant passage");
        assert!((hits[0].score - 0.87).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn upsert_replaces_partition_then_inserts() {
        let server = MockServer::start_async().await;
        let index = test_index(server.base_url());

        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/delete")
                    .body_contains("\"value\":\"doc-a\"");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let put = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::PUT)
                    .path("/collections/documents/points")
                    .query_param("wait", "true")
                    .body_contains("\"document_id\":\"doc-a\"");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let inserted = index
            .upsert("doc-a", vec![sample_point(0), sample_point(1)])
            .await
            .expect("upsert");

        delete.assert();
        put.assert();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let server = MockServer::start_async().await;
        let index = test_index(server.base_url());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/delete");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        index.delete("doc-gone").await.expect("first delete");
        index.delete("doc-gone").await.expect("second delete");
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn count_parses_exact_count() {
        let server = MockServer::start_async().await;
        let index = test_index(server.base_url());

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/count")
                    .body_contains("\"exact\":true");
                then.status(200).json_body(json!({ "result": { "count": 6 } }));
            })
            .await;

        assert_eq!(index.count("doc-a").await.expect("count"), 6);
    }

    #[tokio::test]
    async fn fetch_orders_chunks_across_pages() {
        let server = MockServer::start_async().await;
        let index = test_index(server.base_url());

        let payload = |idx: usize| {
            json!({
                "document_id": "doc-a",
                "chunk_index": idx,
                "start_offset": idx * 10,
                "end_offset": idx * 10 + 10,
                "text": format!("chunk {idx}"),
                "chunk_hash": "h",
                "timestamp": "2026-01-01T00:00:00Z"
            })
        };

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/scroll")
                    .body_contains("\"offset\":null");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "payload": payload(1) }],
                        "next_page_offset": 42
                    }
                }));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/scroll")
                    .body_contains("\"offset\":42");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "payload": payload(0) }],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let chunks = index.fetch("doc-a").await.expect("chunks");
        let order: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, vec![0, 1]);
    }
}
