use super::jwt::JwtService;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_service: self.jwt_service.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_service: Arc<JwtService>,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
    InvalidUuidInClaims(String),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header found for path: {}", path),
            AuthError::InvalidHeaderFormat => format!("Invalid Authorization header format (non-UTF-8) for path: {}", path),
            AuthError::NotBearerToken => format!("Authorization header for path {} doesn't start with 'Bearer '", path),
            AuthError::VerificationFailed(e) => format!("JWT token verification failed for path {}: {}", path, e),
            AuthError::InvalidUuidInClaims(sub) => format!("Invalid UUID in JWT claims.sub for path {}: {}", path, sub),
        }
    }

    fn client_error_json(&self) -> serde_json::Value {
        let error_message = match self {
            AuthError::InvalidUuidInClaims(_) => "Invalid token claims",
            AuthError::VerificationFailed(_) => "Token verification failed",
            _ => "Missing or invalid authorization token",
        };
        serde_json::json!({"error": error_message})
    }
}

/// Registration, login, account management and the liveness probes stay
/// open. Everything else requires a bearer token.
fn is_public_path(path: &str) -> bool {
    path == "/"
        || path == "/register"
        || path == "/login"
        || path == "/users"
        || path.starts_with("/profile/")
        || path == "/health"
        || path == "/warmup"
        || path == "/keep-alive"
}

/// Helper function to validate the token from the request.
fn validate_request_token(
    req: &ServiceRequest,
    jwt_service: &JwtService,
) -> Result<Uuid, AuthError> {
    let auth_header = req.headers().get("Authorization").ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header.to_str().map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str.strip_prefix("Bearer ").ok_or(AuthError::NotBearerToken)?;

    log::debug!("Found Bearer token, verifying...");
    let claims = jwt_service
        .verify_token(token)
        .map_err(|e| AuthError::VerificationFailed(format!("{:?}", e)))?;

    log::debug!("JWT token verified for user: {}", claims.sub);
    Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthError::InvalidUuidInClaims(claims.sub.clone()))
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            let path_str = req.path().to_string();

            if is_public_path(&path_str) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }
            log::debug!("Auth middleware processing path: {}", &path_str);

            match validate_request_token(&req, &jwt_service) {
                Ok(user_id) => {
                    req.extensions_mut().insert(user_id);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) => {
                    log::warn!("{}", auth_error.log_message(&path_str));

                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::Unauthorized()
                        .json(auth_error.client_error_json())
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

pub struct AuthenticatedUser(pub Uuid);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<Uuid>() {
            Some(user_id) => ok(AuthenticatedUser(*user_id)),
            None => {
                // Only reachable when a protected route is registered without
                // this middleware in front of it.
                log::warn!(
                    "AuthenticatedUser extractor: No Uuid found in request extensions for path: {}",
                    req.path()
                );
                ok(AuthenticatedUser(Uuid::nil()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::User;
    use actix_web::test::TestRequest;

    #[test]
    fn request_without_header_is_rejected() {
        let jwt = JwtService::new("test-secret");
        let req = TestRequest::default().uri("/predict").to_srv_request();
        assert!(matches!(
            validate_request_token(&req, &jwt),
            Err(AuthError::NoAuthHeader)
        ));
    }

    #[test]
    fn valid_bearer_token_yields_the_user_id() {
        let jwt = JwtService::new("test-secret");
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "pw123456",
            25,
        );
        let token = jwt.generate_token(&user).unwrap();

        let req = TestRequest::default()
            .uri("/predict")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_srv_request();
        assert_eq!(validate_request_token(&req, &jwt).unwrap(), user.id);
    }

    #[test]
    fn probe_and_account_paths_are_public() {
        for path in ["/", "/register", "/login", "/users", "/health", "/warmup", "/keep-alive"] {
            assert!(is_public_path(path), "{path} should be public");
        }
        for path in ["/predict", "/predict_base64", "/history", "/history/abc", "/model/info"] {
            assert!(!is_public_path(path), "{path} should require auth");
        }
    }
}
