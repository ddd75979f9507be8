use std::env;
use std::str::FromStr;

/// AppConfig
///
/// Immutable configuration resolved once at startup and shared through
/// `AppState` (handlers pull it out with `State<AppConfig>` via `FromRef`).
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: Env,
    /// Postgres connection string. `None` (local only) selects the in-memory
    /// repository.
    pub database_url: Option<String>,
    /// HS256 signing secret for issued tokens.
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub upload_dir: String,
    pub s3: S3Settings,
    pub max_csv_upload_bytes: usize,
    pub max_file_upload_bytes: usize,
    pub bcrypt_cost: u32,
    /// Account created at startup when no user with this email exists.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Env
///
/// Runtime context. Local enables pretty logs, the in-memory fallback and
/// error details in 500 responses; Production disables all three.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Clone, Debug)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub name: String,
}

const LOCAL_JWT_SECRET: &str = "campus-admin-local-development-secret";

impl Default for AppConfig {
    /// Safe values for test state scaffolding. No environment access.
    fn default() -> Self {
        Self {
            env: Env::Local,
            database_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            jwt_expiry_hours: 24,
            bind_addr: "127.0.0.1:3000".to_string(),
            storage: StorageBackend::Local,
            upload_dir: "uploads".to_string(),
            s3: S3Settings::default(),
            max_csv_upload_bytes: 5 * 1024 * 1024,
            max_file_upload_bytes: 10 * 1024 * 1024,
            bcrypt_cost: 12,
            bootstrap_admin: None,
        }
    }
}

impl Default for S3Settings {
    /// MinIO defaults for local development.
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: "admin".to_string(),
            secret_key: "password".to_string(),
            bucket: "campus-uploads".to_string(),
        }
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.env == Env::Production
    }

    /// load
    ///
    /// Reads the configuration from environment variables (call `dotenv()`
    /// first to honour a `.env` file).
    ///
    /// # Panics
    /// In production, panics when `DATABASE_URL` or `JWT_SECRET` is missing, or
    /// when the S3 backend is selected without credentials. A server must
    /// never start on development secrets.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").unwrap_or_default().to_lowercase().as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };
        let defaults = Self::default();

        let (database_url, jwt_secret) = match env {
            Env::Production => (
                Some(env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in production")),
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production."),
            ),
            Env::Local => (
                env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let storage = match env::var("STORAGE_BACKEND").unwrap_or_default().to_lowercase().as_str() {
            "s3" => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        let s3 = match (env, storage) {
            (Env::Production, StorageBackend::S3) => S3Settings {
                endpoint: env::var("S3_ENDPOINT").expect("FATAL: S3_ENDPOINT required in production"),
                region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                access_key: env::var("S3_ACCESS_KEY")
                    .expect("FATAL: S3_ACCESS_KEY required in production"),
                secret_key: env::var("S3_SECRET_KEY")
                    .expect("FATAL: S3_SECRET_KEY required in production"),
                bucket: env::var("S3_BUCKET_NAME").unwrap_or(defaults.s3.bucket.clone()),
            },
            _ => S3Settings {
                endpoint: env::var("S3_ENDPOINT").unwrap_or(defaults.s3.endpoint.clone()),
                region: env::var("S3_REGION").unwrap_or(defaults.s3.region.clone()),
                access_key: env::var("S3_ACCESS_KEY").unwrap_or(defaults.s3.access_key.clone()),
                secret_key: env::var("S3_SECRET_KEY").unwrap_or(defaults.s3.secret_key.clone()),
                bucket: env::var("S3_BUCKET_NAME").unwrap_or(defaults.s3.bucket.clone()),
            },
        };

        let bootstrap_admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() => Some(BootstrapAdmin {
                email,
                password,
                name: env::var("ADMIN_NAME").unwrap_or_else(|_| "System Administrator".to_string()),
            }),
            _ => None,
        };

        Self {
            env,
            database_url,
            jwt_secret,
            jwt_expiry_hours: var_or("JWT_EXPIRY_HOURS", defaults.jwt_expiry_hours),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            storage,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or(defaults.upload_dir.clone()),
            s3,
            max_csv_upload_bytes: var_or("MAX_CSV_UPLOAD_BYTES", defaults.max_csv_upload_bytes),
            max_file_upload_bytes: var_or("MAX_FILE_UPLOAD_BYTES", defaults.max_file_upload_bytes),
            bcrypt_cost: var_or("BCRYPT_COST", defaults.bcrypt_cost),
            bootstrap_admin,
        }
    }
}
