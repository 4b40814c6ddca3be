use axum::{Json, extract::Extension};

use crate::{
    api::admission::{AdmissionError, ensure_activated},
    identity::{Identity, User},
};

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "The authenticated caller", body = User),
        (status = 401, description = "Missing, malformed or expired credential", body = crate::api::admission::ErrorBody),
        (status = 403, description = "Account not activated", body = crate::api::admission::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(Extension(identity): Extension<Identity>) -> Result<Json<User>, AdmissionError> {
    ensure_activated(&identity).cloned().map(Json)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::{
        CredentialStore,
        memory::{MemoryStore, new_user},
    };

    #[tokio::test]
    async fn returns_the_caller() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("chovy@geng.gg", true)).await.unwrap();

        let Json(me) = get_me(Extension(Identity::User(user.clone()))).await.unwrap();
        assert_eq!(me.id, user.id);
        assert_eq!(me.email, "chovy@geng.gg");
    }

    #[tokio::test]
    async fn anonymous_is_rejected() {
        let result = get_me(Extension(Identity::Anonymous)).await;
        assert!(matches!(result, Err(AdmissionError::Unauthenticated)));
    }

    #[tokio::test]
    async fn serialized_user_hides_credentials() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("ruler@geng.gg", true)).await.unwrap();

        let Json(me) = get_me(Extension(Identity::User(user))).await.unwrap();
        let json = serde_json::to_value(&me).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("version").is_none());
        assert_eq!(json["activated"], true);
    }
}
