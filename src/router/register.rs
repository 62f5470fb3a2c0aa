use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{StatusCode, header};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServerError};
use crate::storage::Upload;
use crate::user::{Registration, User, UserService};

pub const SUCCESS_MESSAGE: &str = "User registered successfully";
const IMAGE_FIELD: &str = "image";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
    pub user: User,
}

/// Handler to register user.
pub async fn handler(
    State(users): State<UserService>,
    form: RegisterForm,
) -> Result<Json<Response>> {
    let user = users.register(form.registration, form.upload).await?;

    Ok(Json(Response {
        message: SUCCESS_MESSAGE.to_owned(),
        user,
    }))
}

/// Registration body: multipart form, url-encoded form or JSON.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub registration: Registration,
    pub upload: Option<Upload>,
}

impl<S> FromRequest<S> for RegisterForm
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "multipart/form-data" => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|err| rejection(err.status(), err))?;
                Self::from_multipart(multipart).await
            },
            "application/x-www-form-urlencoded" => {
                let Form(body) = Form::<FormBody>::from_request(req, state)
                    .await
                    .map_err(|err| rejection(err.status(), err))?;
                Ok(Self {
                    registration: body.into(),
                    upload: None,
                })
            },
            mime if mime == "application/json" || mime.ends_with("+json") => {
                let Json(body) = Json::<JsonBody>::from_request(req, state)
                    .await
                    .map_err(|err| rejection(err.status(), err))?;
                Ok(Self {
                    registration: body.try_into()?,
                    upload: None,
                })
            },
            _ => Err(ServerError::parsing(format!(
                "unsupported content type `{mime}`"
            ))),
        }
    }
}

impl RegisterForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| rejection(err.status(), err))?
        {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if let Some(file_name) = field.file_name().map(str::to_owned) {
                if name != IMAGE_FIELD {
                    return Err(ServerError::parsing(format!(
                        "unexpected file field `{name}`"
                    )));
                }

                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| rejection(err.status(), err))?;
                // Browsers send an empty part when no file is selected.
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                if form.upload.is_some() {
                    return Err(ServerError::parsing(format!(
                        "unexpected second file in `{IMAGE_FIELD}`"
                    )));
                }

                form.upload = Some(Upload {
                    original_name: file_name,
                    bytes: bytes.to_vec(),
                });
                continue;
            }

            let slot = match name.as_str() {
                "name" => &mut form.registration.name,
                "email" => &mut form.registration.email,
                "password" => &mut form.registration.password,
                "mobile" => &mut form.registration.mobile,
                _ => {
                    tracing::trace!(field = %name, "ignored form field");
                    continue;
                },
            };
            *slot = Some(
                field
                    .text()
                    .await
                    .map_err(|err| rejection(err.status(), err))?,
            );
        }

        Ok(form)
    }
}

/// Body limit overflows stay 413, everything else is a malformed body.
fn rejection<E>(status: StatusCode, err: E) -> ServerError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(err.into())
    } else {
        ServerError::parsing(err)
    }
}

#[derive(Debug, Deserialize)]
struct FormBody {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    mobile: Option<String>,
}

impl From<FormBody> for Registration {
    fn from(body: FormBody) -> Self {
        Self {
            name: body.name,
            email: body.email,
            password: body.password,
            mobile: body.mobile,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonBody {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    email: Option<Value>,
    #[serde(default)]
    password: Option<Value>,
    #[serde(default)]
    mobile: Option<Value>,
}

impl TryFrom<JsonBody> for Registration {
    type Error = ServerError;

    fn try_from(body: JsonBody) -> Result<Self> {
        Ok(Self {
            name: coerce_text("name", body.name)?,
            email: coerce_text("email", body.email)?,
            // Only a string can be hashed.
            password: match body.password {
                Some(Value::String(password)) => Some(password),
                _ => None,
            },
            mobile: coerce_text("mobile", body.mobile)?,
        })
    }
}

/// Scalars become strings, `null` is absent.
fn coerce_text(field: &str, value: Option<Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Number(value)) => Ok(Some(value.to_string())),
        Some(Value::Bool(value)) => Ok(Some(value.to_string())),
        Some(_) => Err(ServerError::parsing(format!(
            "cannot cast `{field}` to string"
        ))),
    }
}
