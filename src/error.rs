use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Database error: {0}")]
  Db(#[from] sea_orm::DbErr),

  #[error("User not found")]
  UserNotFound,

  #[error("Invalid amount")]
  InvalidAmount,

  #[error("Insufficient balance")]
  InsufficientBalance,

  #[error("Phone number already registered")]
  PhoneTaken,

  #[error("Tour request not found")]
  RequestNotFound,

  #[error("Referral code space exhausted")]
  CodeSpace,

  #[error("Invalid arguments: {0}")]
  InvalidArgs(String),

  #[error("Unauthorized")]
  Unauthorized,

  #[error("Internal error: {0}")]
  Internal(String),
}

impl Error {
  /// Short text safe to show to a chat user.
  pub fn user_message(&self) -> String {
    match self {
      Error::Db(_) | Error::Internal(_) | Error::CodeSpace => {
        "Something went wrong, please try again later.".into()
      }
      Error::UserNotFound => "User not found.".into(),
      Error::InvalidAmount => {
        "Enter a positive amount, e.g. <code>150</code> or <code>99.50</code>."
          .into()
      }
      Error::InsufficientBalance => {
        "Balance is too low for this deduction.".into()
      }
      Error::PhoneTaken => {
        "This phone number is already linked to another account.".into()
      }
      Error::RequestNotFound => "Tour request not found.".into(),
      Error::InvalidArgs(usage) => usage.clone(),
      Error::Unauthorized => "Access denied.".into(),
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::UserNotFound | Error::RequestNotFound => StatusCode::NOT_FOUND,
      Error::InvalidAmount | Error::InvalidArgs(_) => StatusCode::BAD_REQUEST,
      Error::InsufficientBalance | Error::PhoneTaken => StatusCode::CONFLICT,
      Error::Unauthorized => StatusCode::UNAUTHORIZED,
      Error::Db(_) | Error::CodeSpace | Error::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };

    let message = if status.is_server_error() {
      "Internal error".to_string()
    } else {
      self.to_string()
    };

    let body = json::json!({
      "success": false,
      "error": message,
    });

    (status, axum::Json(body)).into_response()
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
