//! OpenAPI document and interactive documentation page.

use axum::{
    http::header,
    response::{Html, IntoResponse},
};
use utoipa::OpenApi;

/// The generated API description for the `/v2` surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chainview API",
        description = "Block header tracking service: verified header chain queries and tip event streaming",
        version = "2.0.0"
    ),
    paths(
        crate::router::handle_network,
        crate::router::handle_height,
        crate::router::handle_tip,
        crate::router::handle_tip_stream,
        crate::router::handle_header_by_height,
        crate::router::handle_header_by_hash,
        crate::router::handle_headers,
    ),
    components(schemas(chainview_core::BlockHeader, crate::router::ErrorBody))
)]
pub struct ApiDoc;

/// Serves the OpenAPI specification as YAML.
pub async fn handle_openapi_spec() -> impl IntoResponse {
    let yaml = ApiDoc::openapi().to_yaml().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/yaml")], yaml)
}

/// Serves a Swagger UI page backed by `/openapi.yaml`.
pub async fn handle_docs() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Chainview API Documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5.10.0/swagger-ui.css">
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.10.0/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({
                url: '/openapi.yaml',
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIBundle.SwaggerUIStandalonePreset
                ]
            });
        };
    </script>
</body>
</html>"#,
    )
}
