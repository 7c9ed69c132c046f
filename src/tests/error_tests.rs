#[cfg(test)]
mod tests {
    use crate::error::{validation, AppError, OptionExt};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;

    #[test]
    fn status_codes_match_the_taxonomy() {
        let cases = [
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::IoError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                AppError::ValidationError { field: "f".into(), message: "m".into() },
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            let response = err.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn range_not_satisfiable_carries_content_range() {
        let response = AppError::RangeNotSatisfiable { length: 1000 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn option_ext_maps_none_to_not_found() {
        let some: Option<i32> = Some(1);
        assert_eq!(some.ok_or_not_found("thing").unwrap(), 1);
        let none: Option<i32> = None;
        let err = none.ok_or_not_found("thing").unwrap_err();
        assert!(matches!(err, AppError::NotFound(msg) if msg.contains("thing")));
    }

    #[test]
    fn tag_validation_rules() {
        let ok = validation::validate_tags(&["  cat ".into(), "red".into()]).unwrap();
        assert_eq!(ok, vec!["cat".to_string(), "red".to_string()]);

        assert!(validation::validate_tags(&["".into()]).is_err());
        assert!(validation::validate_tags(&["   ".into()]).is_err());
        assert!(validation::validate_tags(&["x".repeat(200)]).is_err());
        let too_many: Vec<String> = (0..101).map(|i| format!("t{}", i)).collect();
        assert!(validation::validate_tags(&too_many).is_err());
    }

    #[test]
    fn limit_validation() {
        assert_eq!(validation::validate_limit(None, 100, 500).unwrap(), 100);
        assert_eq!(validation::validate_limit(Some(50), 100, 500).unwrap(), 50);
        assert_eq!(validation::validate_limit(Some(9999), 100, 500).unwrap(), 500);
        assert!(validation::validate_limit(Some(0), 100, 500).is_err());
        assert!(validation::validate_limit(Some(-1), 100, 500).is_err());
    }
}
