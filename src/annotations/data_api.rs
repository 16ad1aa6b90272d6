/// Document-store annotation backend over HTTPS
///
/// Talks to a document database through its JSON Data API:
///   POST {endpoint}/action/insertOne  → { "insertedId": "..." }
///   POST {endpoint}/action/find       → { "documents": [ ... ] }
///
/// Every request names the cluster (`dataSource`), database and collection,
/// and authenticates with an `api-key` header.
///
/// The collection also holds documents from earlier writers: `comment`,
/// `user` and `annotations` in place of `text`, `author` and `tags`, Extended
/// JSON dates, and no `source`, `data_point_id` or `updated_at`. Those are
/// read back with the missing fields derived.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnnotationQuery, AnnotationStore};
use crate::logging::{self, DataSource};
use crate::model::{self, Annotation, AnnotationError, NewAnnotation};

const DEFAULT_FIND_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct InsertOneResponse {
    #[serde(rename = "insertedId")]
    inserted_id: Value,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    documents: Vec<Value>,
}

/// A stored comment in any of the shapes found in the collection.
#[derive(Debug, Deserialize)]
struct StoredDocument {
    country: String,
    #[serde(alias = "comment")]
    text: String,
    #[serde(default)]
    province: Option<String>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default, alias = "user")]
    author: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default, alias = "annotations")]
    tags: Option<Vec<String>>,
    #[serde(default)]
    data_point_id: Option<String>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    updated_at: Option<Value>,
}

impl StoredDocument {
    /// `None` when neither a date nor a creation time can be read.
    fn into_annotation(self) -> Option<Annotation> {
        let created_at = self.created_at.as_ref().and_then(document_timestamp);
        let date = self
            .date
            .as_ref()
            .and_then(document_date)
            .or_else(|| created_at.map(|t| t.date_naive()))?;
        let created_at = match created_at {
            Some(t) => t,
            None => Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?),
        };
        let updated_at = self
            .updated_at
            .as_ref()
            .and_then(document_timestamp)
            .unwrap_or(created_at);
        let data_point_id = self
            .data_point_id
            .unwrap_or_else(|| model::data_point_id(&self.country, self.province.as_deref(), date));

        Some(Annotation {
            data_point_id,
            country: self.country,
            province: self.province,
            date,
            author: self.author.unwrap_or_else(|| "anonymous".to_string()),
            text: self.text,
            source: self.source.unwrap_or_else(|| "api".to_string()),
            tags: self.tags.unwrap_or_default(),
            created_at,
            updated_at,
        })
    }
}

pub struct DataApiAnnotationStore {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    data_source: String,
    database: String,
    collection: String,
}

impl DataApiAnnotationStore {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        data_source: &str,
        database: &str,
        collection: &str,
        timeout: Duration,
    ) -> Result<Self, AnnotationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnnotationError::Unavailable(e.to_string()))?;

        Ok(DataApiAnnotationStore {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            data_source: data_source.to_string(),
            database: database.to_string(),
            collection: collection.to_string(),
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/action/{}", self.endpoint, action)
    }

    /// Request body shared by every action.
    fn base_body(&self) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("dataSource".to_string(), json!(self.data_source));
        body.insert("database".to_string(), json!(self.database));
        body.insert("collection".to_string(), json!(self.collection));
        body
    }

    fn insert_body(&self, annotation: &Annotation) -> Result<Value, AnnotationError> {
        let document = serde_json::to_value(annotation).map_err(|e| AnnotationError::Parse(e.to_string()))?;
        let mut body = self.base_body();
        body.insert("document".to_string(), document);
        Ok(Value::Object(body))
    }

    fn find_body(&self, query: &AnnotationQuery) -> Value {
        let mut filter = serde_json::Map::new();
        if let Some(country) = &query.country {
            filter.insert("country".to_string(), json!(country));
        }
        if let Some(province) = &query.province {
            filter.insert("province".to_string(), json!(province));
        }

        let mut body = self.base_body();
        body.insert("filter".to_string(), Value::Object(filter));
        body.insert("projection".to_string(), json!({ "_id": 0 }));
        body.insert("limit".to_string(), json!(query.limit.unwrap_or(DEFAULT_FIND_LIMIT)));
        Value::Object(body)
    }

    fn post(&self, action: &str, body: &Value) -> Result<reqwest::blocking::Response, AnnotationError> {
        let response = self
            .client
            .post(self.action_url(action))
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .map_err(|e| AnnotationError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnnotationError::Http(response.status().as_u16()));
        }
        Ok(response)
    }
}

impl AnnotationStore for DataApiAnnotationStore {
    fn name(&self) -> &str {
        "data_api"
    }

    fn append(&self, annotation: NewAnnotation) -> Result<String, AnnotationError> {
        let stored = annotation.into_annotation(Utc::now());
        let body = self.insert_body(&stored)?;
        let response: InsertOneResponse = self
            .post("insertOne", &body)?
            .json()
            .map_err(|e| AnnotationError::Parse(e.to_string()))?;
        Ok(inserted_id_string(&response.inserted_id))
    }

    fn query(&self, query: &AnnotationQuery) -> Result<Vec<Annotation>, AnnotationError> {
        let body = self.find_body(query);
        let response: FindResponse = self
            .post("find", &body)?
            .json()
            .map_err(|e| AnnotationError::Parse(e.to_string()))?;
        Ok(parse_documents(response.documents, query.country.as_deref()))
    }
}

/// Ids come back either as a plain string or as `{ "$oid": "..." }`.
fn inserted_id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(s)) => s.clone(),
            _ => id.to_string(),
        },
        other => other.to_string(),
    }
}

/// Reads a timestamp as RFC 3339, a naive UTC date-time, a bare date, or
/// Extended JSON (`{"$date": ...}` with a string, millis or `$numberLong`).
fn document_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.with_timezone(&Utc));
            }
            if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&t));
            }
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?))
        }
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        Value::Object(map) => match map.get("$date").or_else(|| map.get("$numberLong"))? {
            Value::String(s) if map.contains_key("$numberLong") => {
                Utc.timestamp_millis_opt(s.parse().ok()?).single()
            }
            inner => document_timestamp(inner),
        },
        _ => None,
    }
}

fn document_date(value: &Value) -> Option<NaiveDate> {
    document_timestamp(value).map(|t| t.date_naive())
}

/// Documents that match no known comment shape are skipped rather than
/// failing the whole query.
fn parse_documents(documents: Vec<Value>, country: Option<&str>) -> Vec<Annotation> {
    let total = documents.len();
    let parsed: Vec<Annotation> = documents
        .into_iter()
        .filter_map(|doc| serde_json::from_value::<StoredDocument>(doc).ok())
        .filter_map(StoredDocument::into_annotation)
        .collect();

    if parsed.len() < total {
        logging::warn(
            DataSource::Annotations,
            country,
            &format!("Skipped {} malformed annotation documents", total - parsed.len()),
        );
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> DataApiAnnotationStore {
        DataApiAnnotationStore::new(
            endpoint,
            "secret",
            "covid19project",
            "covid19_supplementary",
            "comments",
            Duration::from_secs(2),
        )
        .expect("client builds")
    }

    #[test]
    fn test_action_url_strips_trailing_slash() {
        let s = store("https://data.example.net/endpoint/data/v1/");
        assert_eq!(s.action_url("find"), "https://data.example.net/endpoint/data/v1/action/find");
    }

    #[test]
    fn test_find_body_filters_by_country_and_hides_ids() {
        let s = store("https://data.example.net");
        let body = s.find_body(&AnnotationQuery::country("Latvia"));
        assert_eq!(body["collection"], "comments");
        assert_eq!(body["filter"]["country"], "Latvia");
        assert!(body["filter"].get("province").is_none());
        assert_eq!(body["projection"]["_id"], 0);
        assert_eq!(body["limit"], DEFAULT_FIND_LIMIT);
    }

    #[test]
    fn test_insert_body_wraps_document() {
        let s = store("https://data.example.net");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let annotation = NewAnnotation::new("Latvia", "spike").into_annotation(now);
        let body = s.insert_body(&annotation).unwrap();
        assert_eq!(body["database"], "covid19_supplementary");
        assert_eq!(body["document"]["text"], "spike");
        assert_eq!(body["document"]["country"], "Latvia");
    }

    #[test]
    fn test_inserted_id_forms() {
        assert_eq!(inserted_id_string(&json!("abc")), "abc");
        assert_eq!(inserted_id_string(&json!({ "$oid": "64f0" })), "64f0");
    }

    #[test]
    fn test_malformed_documents_are_skipped() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let good = serde_json::to_value(NewAnnotation::new("Latvia", "ok").into_annotation(now)).unwrap();
        let no_text = json!({ "country": "Latvia", "created_at": "2024-05-01T13:00:00Z" });
        let no_date = json!({ "country": "Latvia", "comment": "when?" });
        let parsed = parse_documents(vec![good, no_text, no_date], Some("Latvia"));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "ok");
    }

    #[test]
    fn test_earlier_comment_shapes_are_read_back() {
        let posted = json!({
            "country": "Latvia",
            "comment": "spike",
            "created_at": { "$date": "2024-05-01T13:00:00.250Z" }
        });
        let inserted = json!({
            "data_point_id": "Latvia-Riga-2024-04-30",
            "country": "Latvia",
            "province": "Riga",
            "date": { "$date": { "$numberLong": "1714435200000" } },
            "user": "ab",
            "comment": "note",
            "source": "manual",
            "annotations": ["reporting lag"],
            "created_at": "2024-05-01T13:00:00",
            "updated_at": "2024-05-02T08:30:00Z"
        });

        let parsed = parse_documents(vec![posted, inserted], Some("Latvia"));
        assert_eq!(parsed.len(), 2);

        let created = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap() + chrono::Duration::milliseconds(250);
        assert_eq!(parsed[0].text, "spike");
        assert_eq!(parsed[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(parsed[0].created_at, created);
        assert_eq!(parsed[0].updated_at, created);
        assert_eq!(parsed[0].author, "anonymous");
        assert_eq!(parsed[0].source, "api");
        assert_eq!(parsed[0].data_point_id, "Latvia-None-2024-05-01");
        assert!(parsed[0].tags.is_empty());

        assert_eq!(parsed[1].text, "note");
        assert_eq!(parsed[1].author, "ab");
        assert_eq!(parsed[1].province.as_deref(), Some("Riga"));
        assert_eq!(parsed[1].date, NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
        assert_eq!(parsed[1].tags, vec!["reporting lag".to_string()]);
        assert_eq!(parsed[1].data_point_id, "Latvia-Riga-2024-04-30");
        assert_eq!(parsed[1].created_at, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
        assert_eq!(parsed[1].updated_at, Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_documents_written_by_this_service_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let stored = NewAnnotation::new("Latvia", "ok").into_annotation(now);
        let parsed = parse_documents(vec![serde_json::to_value(&stored).unwrap()], None);
        assert_eq!(parsed, vec![stored]);
    }

    #[test]
    fn test_unreachable_endpoint_is_unavailable() {
        let s = store("http://127.0.0.1:1");
        let err = s.query(&AnnotationQuery::country("Latvia")).unwrap_err();
        assert!(matches!(err, AnnotationError::Unavailable(_)));
    }
}
