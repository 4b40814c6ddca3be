use utoipa::{
    Modify, OpenApi,
    openapi::{
        Contact, License,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};

use super::{
    admission::ErrorBody,
    handlers::{health, me},
};
use crate::identity::User;

#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::healthcheck, me::get_me),
    components(schemas(
        health::Health,
        health::Healthcheck,
        health::LimiterStatus,
        User,
        ErrorBody
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Liveness and operator status"),
        (name = "me", description = "The authenticated caller")
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("Opaque authentication token"))
                    .build(),
            ),
        );
    }
}

/// The `OpenAPI` document with package metadata from Cargo.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => {
            let email = rest.split_once('>').map(|(email, _)| email.trim());
            (optional_str(name.trim()), email.and_then(optional_str))
        }
        None => (optional_str(author.trim()), None),
    }
}

fn optional_str(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}
