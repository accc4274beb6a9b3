//! In-memory document collection exposed as a CRUD resource.
//!
//! Stands in for the persistence layer behind each resource prefix. It
//! raises the same raw defects a document store would (malformed id,
//! duplicate key, validation), so the error handler's production
//! classification can be exercised end to end.
//!
//! | Method   | Path    | Response                          |
//! |----------|---------|-----------------------------------|
//! | `GET`    | `/`     | 200, list envelope                |
//! | `POST`   | `/`     | 201, created document             |
//! | `GET`    | `/{id}` | 200, document                     |
//! | `PATCH`  | `/{id}` | 200, updated document             |
//! | `DELETE` | `/{id}` | 204                               |

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult, Defect};
use crate::models::Envelope;
use crate::routing::{Resource, RouteError};

/// Field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Query keys that shape the listing instead of filtering it.
const RESERVED_QUERY_KEYS: &[&str] = &["page", "sort", "limit", "fields"];

/// Schema rules for one collection.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Singular name used in messages ("tour").
    pub name: &'static str,
    pub required: Vec<&'static str>,
    /// Field whose value must be unique across documents.
    pub unique: Option<&'static str>,
}

/// Insertion-ordered documents guarded by an async lock.
#[derive(Debug)]
pub struct Collection {
    schema: Schema,
    docs: RwLock<Vec<Map<String, Value>>>,
}

impl Collection {
    pub fn new(schema: Schema) -> Arc<Self> {
        Arc::new(Self {
            schema,
            docs: RwLock::new(Vec::new()),
        })
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Documents whose top-level fields equal every filter in `query`.
    ///
    /// An array filter value matches any of its elements. `limit` and `page`
    /// paginate the result.
    pub async fn find(&self, query: &Map<String, Value>) -> Vec<Value> {
        let filters: Vec<(&String, &Value)> = query
            .iter()
            .filter(|(key, _)| !RESERVED_QUERY_KEYS.contains(&key.as_str()))
            .collect();
        let limit = positive_number(query.get("limit")).unwrap_or(100);
        let page = positive_number(query.get("page")).unwrap_or(1);

        let docs = self.docs.read().await;
        docs.iter()
            .filter(|doc| {
                filters
                    .iter()
                    .all(|(key, wanted)| field_matches(doc.get(key.as_str()), wanted))
            })
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(|doc| Value::Object(doc.clone()))
            .collect()
    }

    pub async fn get(&self, id: &str) -> AppResult<Value> {
        let id = parse_id(id)?;
        let docs = self.docs.read().await;
        docs.iter()
            .find(|doc| has_id(doc, &id))
            .map(|doc| Value::Object(doc.clone()))
            .ok_or_else(|| self.missing())
    }

    pub async fn create(&self, body: &Value) -> AppResult<Value> {
        let mut doc = as_document(body)?;
        doc.remove(ID_FIELD);
        self.validate(&doc)?;

        let mut docs = self.docs.write().await;
        self.check_unique(&docs, &doc, None)?;

        let id = Uuid::new_v4();
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        docs.push(doc.clone());
        debug!(collection = self.schema.name, id = %id, "Created document");

        Ok(Value::Object(doc))
    }

    pub async fn update(&self, id: &str, body: &Value) -> AppResult<Value> {
        let id = parse_id(id)?;
        let mut changes = as_document(body)?;
        changes.remove(ID_FIELD);

        let mut docs = self.docs.write().await;
        let index = docs
            .iter()
            .position(|doc| has_id(doc, &id))
            .ok_or_else(|| self.missing())?;

        let mut updated = docs.get(index).cloned().unwrap_or_default();
        updated.extend(changes);
        self.validate(&updated)?;
        self.check_unique(&docs, &updated, Some(&id))?;

        if let Some(slot) = docs.get_mut(index) {
            *slot = updated.clone();
        }
        Ok(Value::Object(updated))
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let id = parse_id(id)?;
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|doc| !has_id(doc, &id));
        if docs.len() == before {
            return Err(self.missing());
        }
        Ok(())
    }

    fn validate(&self, doc: &Map<String, Value>) -> AppResult<()> {
        let errors: Vec<String> = self
            .schema
            .required
            .iter()
            .filter(|field| doc.get(**field).is_none_or(Value::is_null))
            .map(|field| format!("A {} must have a {field}", self.schema.name))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Defect::Validation { errors }.into())
        }
    }

    fn check_unique(
        &self,
        docs: &[Map<String, Value>],
        doc: &Map<String, Value>,
        except: Option<&Uuid>,
    ) -> AppResult<()> {
        let Some(field) = self.schema.unique else {
            return Ok(());
        };
        let Some(value) = doc.get(field) else {
            return Ok(());
        };

        let taken = docs
            .iter()
            .filter(|other| except.is_none_or(|id| !has_id(other, id)))
            .any(|other| other.get(field) == Some(value));

        if taken {
            return Err(Defect::DuplicateKey {
                field: field.to_string(),
                value: value.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn missing(&self) -> AppError {
        AppError::not_found(format!("No {} found with that ID", self.schema.name))
    }
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| {
        Defect::MalformedId {
            path: ID_FIELD.to_string(),
            value: raw.to_string(),
        }
        .into()
    })
}

fn has_id(doc: &Map<String, Value>, id: &Uuid) -> bool {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .is_some_and(|doc_id| doc_id == *id)
}

fn as_document(body: &Value) -> AppResult<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map.clone()),
        _ => Err(Defect::Validation {
            errors: vec!["Document must be a JSON object".to_string()],
        }
        .into()),
    }
}

/// Query values arrive as strings; numbers in documents compare by text.
fn field_matches(actual: Option<&Value>, wanted: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match wanted {
        Value::Array(options) => options.iter().any(|w| field_matches(Some(actual), w)),
        Value::String(w) => match actual {
            Value::String(a) => a == w,
            Value::Number(n) => n.to_string() == *w,
            Value::Bool(b) => b.to_string() == *w,
            _ => false,
        },
        other => actual == other,
    }
}

fn positive_number(value: Option<&Value>) -> Option<usize> {
    value?.as_str()?.parse().ok().filter(|n| *n > 0)
}

// =============================================================================
// Resource wiring
// =============================================================================

/// Build the CRUD sub-router for `collection`.
///
/// # Errors
///
/// Returns [`RouteError`] if route registration fails.
pub fn resource(collection: Arc<Collection>) -> Result<Resource, RouteError> {
    let list = collection.clone();
    let create = collection.clone();
    let get = collection.clone();
    let update = collection.clone();
    let delete = collection;

    Resource::new()
        .get("/", move |ctx: RequestContext| list_documents(list.clone(), ctx))?
        .post("/", move |ctx: RequestContext| create_document(create.clone(), ctx))?
        .get("/{id}", move |ctx: RequestContext| get_document(get.clone(), ctx))?
        .patch("/{id}", move |ctx: RequestContext| update_document(update.clone(), ctx))?
        .delete("/{id}", move |ctx: RequestContext| delete_document(delete.clone(), ctx))
}

fn id_param(ctx: &RequestContext) -> &str {
    ctx.params.get("id").map(String::as_str).unwrap_or_default()
}

#[instrument(skip_all, fields(collection = collection.schema.name))]
async fn list_documents(collection: Arc<Collection>, ctx: RequestContext) -> AppResult<Response> {
    let docs = collection.find(&ctx.query).await;
    Ok(Json(Envelope::list(docs).requested_at(ctx.request_time())).into_response())
}

#[instrument(skip_all, fields(collection = collection.schema.name))]
async fn create_document(collection: Arc<Collection>, ctx: RequestContext) -> AppResult<Response> {
    let doc = collection.create(&ctx.body).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(doc).requested_at(ctx.request_time())),
    )
        .into_response())
}

#[instrument(skip_all, fields(collection = collection.schema.name, id = %id_param(&ctx)))]
async fn get_document(collection: Arc<Collection>, ctx: RequestContext) -> AppResult<Response> {
    let doc = collection.get(id_param(&ctx)).await?;
    Ok(Json(Envelope::success(doc).requested_at(ctx.request_time())).into_response())
}

#[instrument(skip_all, fields(collection = collection.schema.name, id = %id_param(&ctx)))]
async fn update_document(collection: Arc<Collection>, ctx: RequestContext) -> AppResult<Response> {
    let doc = collection.update(id_param(&ctx), &ctx.body).await?;
    Ok(Json(Envelope::success(doc).requested_at(ctx.request_time())).into_response())
}

#[instrument(skip_all, fields(collection = collection.schema.name, id = %id_param(&ctx)))]
async fn delete_document(collection: Arc<Collection>, ctx: RequestContext) -> AppResult<Response> {
    collection.delete(id_param(&ctx)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
