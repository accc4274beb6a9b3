//! Resource handlers mounted behind the pipeline.
//!
//! # Endpoints
//!
//! - `/api/v1/tours` - tour documents, unique by `name`
//! - `/api/v1/users` - user documents, unique by `email`
//! - `/api/v1/reviews` - review documents
//!
//! Each prefix gets the CRUD routes of [`collection::resource`].

pub mod collection;

use crate::routing::{RouteError, RouteTable};

pub use collection::{Collection, Schema};

pub const TOURS_PREFIX: &str = "/api/v1/tours";
pub const USERS_PREFIX: &str = "/api/v1/users";
pub const REVIEWS_PREFIX: &str = "/api/v1/reviews";

/// Mount the three document collections onto `routes`.
///
/// # Errors
///
/// Returns [`RouteError`] if route registration fails.
pub fn mount_collections(routes: RouteTable) -> Result<RouteTable, RouteError> {
    let tours = Collection::new(Schema {
        name: "tour",
        required: vec!["name", "price"],
        unique: Some("name"),
    });
    let users = Collection::new(Schema {
        name: "user",
        required: vec!["name", "email"],
        unique: Some("email"),
    });
    let reviews = Collection::new(Schema {
        name: "review",
        required: vec!["review"],
        unique: None,
    });

    Ok(routes
        .mount(TOURS_PREFIX, collection::resource(tours)?)
        .mount(USERS_PREFIX, collection::resource(users)?)
        .mount(REVIEWS_PREFIX, collection::resource(reviews)?))
}
