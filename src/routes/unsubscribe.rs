use axum::extract::{Query, State};
use axum::response::Html;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::{UnsubscribeRequest, UnsubscribeResponse};

/// Confirmation page for the link in mail footers. The address is read
/// client-side from the query string, so no request data is interpolated
/// into the markup.
const CONFIRMATION_PAGE: &str = r##"<!DOCTYPE html>
<html lang="ja">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>配信停止 - NANKANアナリティクス</title>
  <style>
    body { font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; background-color: #f8fafc; }
    .container { background: white; padding: 30px; border-radius: 12px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); }
    .header { background: #1e293b; color: white; padding: 20px; text-align: center; border-radius: 8px; margin-bottom: 20px; }
    button { background: #dc2626; color: white; border: none; padding: 12px 24px; border-radius: 6px; cursor: pointer; font-size: 16px; }
    #result { margin-top: 20px; text-align: center; font-weight: bold; }
  </style>
</head>
<body>
  <div class="container">
    <div class="header">
      <h1>NANKANアナリティクス</h1>
      <p>メール配信停止</p>
    </div>
    <h2>配信停止の確認</h2>
    <p><strong id="email"></strong> 宛のメール配信を停止しますか？</p>
    <div style="text-align: center; margin-top: 30px;">
      <button id="unsubscribe-btn">配信停止する</button>
    </div>
    <div id="result"></div>
  </div>
  <script>
    const email = new URLSearchParams(window.location.search).get('email') || '';
    document.getElementById('email').textContent = email;
    document.getElementById('unsubscribe-btn').addEventListener('click', async () => {
      const btn = document.getElementById('unsubscribe-btn');
      const result = document.getElementById('result');
      btn.disabled = true;
      try {
        const response = await fetch('/unsubscribe', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ email })
        });
        const data = await response.json();
        if (data.success) {
          result.style.color = '#10b981';
          result.textContent = '配信停止が完了しました';
          btn.style.display = 'none';
        } else {
          result.style.color = '#dc2626';
          result.textContent = 'エラーが発生しました: ' + data.error;
          btn.disabled = false;
        }
      } catch (e) {
        result.style.color = '#dc2626';
        result.textContent = 'エラーが発生しました';
        btn.disabled = false;
      }
    });
  </script>
</body>
</html>
"##;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub email: Option<String>,
}

/// GET /unsubscribe?email=… — confirmation page linked from mail footers.
pub async fn confirmation_page(
    Query(params): Query<PageParams>,
) -> Result<Html<&'static str>, ApiError> {
    let has_email = params
        .email
        .as_deref()
        .is_some_and(|email| !email.trim().is_empty());
    if !has_email {
        return Err(ApiError::Validation(
            "email parameter is required".to_string(),
        ));
    }
    Ok(Html(CONFIRMATION_PAGE))
}

/// POST /unsubscribe — flag the address as opted out of the newsletter.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    request.validate()?;

    let known = state.directory.mark_unsubscribed(&request.email).await?;
    if !known {
        warn!(email = %request.email, "unsubscribe request for unknown address");
        return Err(ApiError::NotFound("email not registered".to_string()));
    }

    info!(email = %request.email, "address unsubscribed");
    Ok(Json(UnsubscribeResponse {
        success: true,
        message: "配信停止が完了しました".to_string(),
        email: request.email,
    }))
}
