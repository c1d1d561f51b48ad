use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

/// Success body shared by every endpoint: `{status, message, data}`.
pub fn envelope<T: Serialize>(status: StatusCode, message: &str, data: T) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "status": status.as_u16(),
            "message": message,
            "data": data
        })),
    )
}

pub fn ok<T: Serialize>(message: &str, data: T) -> (StatusCode, Json<Value>) {
    envelope(StatusCode::OK, message, data)
}

pub fn created<T: Serialize>(message: &str, data: T) -> (StatusCode, Json<Value>) {
    envelope(StatusCode::CREATED, message, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_envelope() {
        let (status, Json(body)) = created("Schedule request submitted", json!({ "id": 1 }));

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], 201);
        assert_eq!(body["message"], "Schedule request submitted");
        assert_eq!(body["data"]["id"], 1);
    }
}
