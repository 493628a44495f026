//! Common test utilities for E2E tests

use chrono::Utc;
use quire::data::{Book, BookKind, EntityId, User};
use quire::service::AccountService;
use quire::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const DOMAIN: &str = "test.example.com";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Does not follow redirects, so 303s can be asserted on
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: DOMAIN.to_string(),
                protocol: "https".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            instance: config::InstanceConfig {
                name: "Test Instance".to_string(),
                description: "Test Quire Instance".to_string(),
                page_length: 15,
            },
            admin: config::AdminConfig {
                localname: "admin".to_string(),
                display_name: "Test Admin".to_string(),
                email: Some("admin@test.example.com".to_string()),
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                session_max_age: 604800,
            },
            federation: config::FederationConfig {
                remote_scheme: "https".to_string(),
                delivery_concurrency: 2,
                delivery_timeout_secs: 2,
                key_bits: 1024,
                allow_private_hosts: false,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = quire::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// The admin created at startup
    pub async fn admin(&self) -> User {
        self.state
            .db
            .get_user_by_localname("admin")
            .await
            .unwrap()
            .expect("admin exists")
    }

    /// Create a local user with default shelves
    pub async fn create_user(&self, localname: &str) -> User {
        AccountService::from_state(&self.state)
            .create_local_user(localname, None, false)
            .await
            .unwrap()
    }

    /// Signed session token for `user`
    pub fn token_for(&self, user: &User) -> String {
        use quire::auth::{Session, create_session_token};

        let session = Session::new(&user.id, self.state.config.auth.session_max_age);
        create_session_token(&session, &self.state.config.auth.session_secret)
            .expect("Failed to create test token")
    }

    /// Save an edition with the given title
    pub async fn create_book(&self, title: &str) -> Book {
        let id = EntityId::new().0;
        let book = Book {
            id: id.clone(),
            remote_id: format!("https://{}/book/{}", DOMAIN, id),
            kind: BookKind::Edition,
            title: title.to_string(),
            subtitle: None,
            authors: Some("Test Author".to_string()),
            isbn_10: None,
            isbn_13: None,
            cover: None,
            physical_format: None,
            published_year: None,
            parent_work_id: None,
            default_edition_id: None,
            created_at: Utc::now(),
        };
        self.state.db.insert_book(&book).await.unwrap();
        book
    }
}
