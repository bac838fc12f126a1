#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod store;

use crate::config::{ImportConfig, StoreBackend, StoreConfig};
use crate::db::FleetDb;
use crate::import::mapping::{MappingError, MappingRegistry};
use crate::request_logger::RequestLogger;
use crate::routes::ImportContext;
use crate::store::{PgStore, StoreError, TargetStore, build_store};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use thiserror::Error;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("mapping registry: {0}")]
    Mapping(#[from] MappingError),
    #[error("target store: {0}")]
    Store(#[from] StoreError),
    #[error("migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database pool 'fleet_db' is not available")]
    MissingPool,
}

/// The configured mapping document, or the built-in fleet mappings.
pub fn load_registry(config: &ImportConfig) -> Result<MappingRegistry, MappingError> {
    match &config.mappings_path {
        Some(path) => MappingRegistry::load(path),
        None => Ok(MappingRegistry::builtin()),
    }
}

async fn build_context(
    pool: Option<sqlx::PgPool>,
    store_config: &StoreConfig,
    import_config: ImportConfig,
) -> Result<ImportContext, StartupError> {
    let registry = Arc::new(load_registry(&import_config)?);

    let store: Arc<dyn TargetStore> = match store_config.backend {
        StoreBackend::Postgres => {
            let pool = pool.ok_or(StartupError::MissingPool)?;
            if store_config.run_migrations {
                db::run_migrations(&pool).await?;
                log::info!("database migrations successful");
            }
            Arc::new(PgStore::new(pool))
        }
        _ => build_store(store_config)?,
    };

    log::info!(
        "import pipeline ready: store={}, batch size {}, {} mapped tables",
        store.name(),
        import_config.batch_size,
        registry.mappings().len()
    );
    Ok(ImportContext::new(store, registry, import_config))
}

/// Every API route plus the generated `openapi.json`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health routes
        routes::health::health_check,
        // Mapping routes
        routes::mappings::list_mappings,
        routes::mappings::import_order,
        // Upload routes
        routes::uploads::upload_database,
        routes::uploads::get_upload,
        routes::uploads::delete_upload,
        routes::uploads::preview_table,
        // Import routes
        routes::imports::start_import,
        routes::imports::get_import_status,
        routes::imports::cancel_import,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let store_config = StoreConfig::from_env();
    let import_config = ImportConfig::from_env();

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    let mut rocket = rocket::build().attach(RequestLogger).attach(cors);

    if store_config.backend == StoreBackend::Postgres {
        rocket = rocket.attach(FleetDb::init());
    }

    rocket
        .attach(AdHoc::try_on_ignite("Import Context", move |rocket| async move {
            let pool = FleetDb::fetch(&rocket).map(|db| (**db).clone());
            match build_context(pool, &store_config, import_config).await {
                Ok(context) => Ok(rocket.manage(context)),
                Err(e) => {
                    log::error!("failed to initialize import pipeline: {}", e);
                    Err(rocket)
                }
            }
        }))
        .mount("/api/v1", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Fleet Import API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::routes::ImportContext;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rusqlite::Connection;
    use rusqlite::types::Value as SqlValue;

    pub use database::{TestDatabase, TestDatabaseError};

    const LEGACY_SCHEMA: &str = r#"
        CREATE TABLE cars (
            id INTEGER PRIMARY KEY, make TEXT, model TEXT, year INTEGER, plate TEXT,
            vin TEXT, color TEXT, daily_rate REAL, mileage INTEGER, status TEXT,
            purchase_date DATE, purchase_price REAL
        );
        CREATE TABLE renters (
            id INTEGER PRIMARY KEY, name TEXT, phone TEXT, email TEXT,
            license_number TEXT, address TEXT, notes TEXT
        );
        CREATE TABLE rentals (
            id INTEGER PRIMARY KEY, car_id INTEGER, renter_name TEXT, start_date DATE,
            end_date DATE, daily_rate REAL, total_amount REAL, deposit REAL, status TEXT,
            start_mileage INTEGER, end_mileage INTEGER, notes TEXT
        );
        CREATE TABLE payments (
            id INTEGER PRIMARY KEY, rental_id INTEGER, amount REAL, payment_date DATE,
            method TEXT, notes TEXT
        );
        CREATE TABLE expenses (
            id INTEGER PRIMARY KEY, car_id INTEGER, category TEXT, amount REAL,
            expense_date DATE, description TEXT, vendor TEXT
        );
        CREATE TABLE insurance (
            id INTEGER PRIMARY KEY, car_id INTEGER, provider TEXT, policy_number TEXT,
            start_date DATE, expiry_date DATE, premium REAL
        );
        CREATE TABLE registration (
            id INTEGER PRIMARY KEY, car_id INTEGER, registration_number TEXT,
            expiry_date DATE, state TEXT, fee REAL
        );
        CREATE TABLE maintenance (
            id INTEGER PRIMARY KEY, car_id INTEGER, description TEXT, service_date DATE,
            cost REAL, status TEXT
        );
        CREATE TABLE fines (
            id INTEGER PRIMARY KEY, car_id INTEGER, rental_id INTEGER, amount REAL,
            violation_date DATE, description TEXT, paid INTEGER
        );
        CREATE TABLE tracker (
            id INTEGER PRIMARY KEY, car_id INTEGER, tracker_id TEXT, provider TEXT,
            sim_number TEXT, installed_date DATE
        );
    "#;

    fn text(value: &str) -> SqlValue {
        SqlValue::Text(value.to_string())
    }

    fn optional_text(value: Option<&str>) -> SqlValue {
        value.map(text).unwrap_or(SqlValue::Null)
    }

    /// Builds legacy fleet databases as raw SQLite bytes.
    ///
    /// Every legacy table is created; tables without rows stay empty.
    #[derive(Default)]
    pub struct FleetFixture {
        statements: Vec<String>,
        rows: Vec<(String, Vec<SqlValue>)>,
    }

    impl FleetFixture {
        pub fn new() -> Self {
            Self::default()
        }

        fn row(mut self, sql: &str, values: Vec<SqlValue>) -> Self {
            self.rows.push((sql.to_string(), values));
            self
        }

        /// Run extra SQL (for example an unmapped table) after the legacy schema.
        pub fn statement(mut self, sql: &str) -> Self {
            self.statements.push(sql.to_string());
            self
        }

        pub fn car(self, id: i64, make: &str, model: &str, plate: &str) -> Self {
            self.row(
                "INSERT INTO cars (id, make, model, year, plate, vin, color, daily_rate, mileage, status, purchase_date, purchase_price) \
                 VALUES (?1, ?2, ?3, 2020, ?4, NULL, 'white', 45.0, 12000, 'Available', '2020-03-01', 18000.0)",
                vec![SqlValue::Integer(id), text(make), text(model), text(plate)],
            )
        }

        pub fn renter(self, id: i64, name: &str, phone: Option<&str>) -> Self {
            self.row(
                "INSERT INTO renters (id, name, phone, email) VALUES (?1, ?2, ?3, NULL)",
                vec![SqlValue::Integer(id), text(name), optional_text(phone)],
            )
        }

        pub fn rental(self, id: i64, car_id: i64, renter_name: &str) -> Self {
            self.row(
                "INSERT INTO rentals (id, car_id, renter_name, start_date, end_date, daily_rate, total_amount, status) \
                 VALUES (?1, ?2, ?3, '2024-05-01', '2024-05-04', 45.0, 135.0, 'Completed')",
                vec![SqlValue::Integer(id), SqlValue::Integer(car_id), text(renter_name)],
            )
        }

        pub fn payment(self, id: i64, rental_id: i64, amount: f64) -> Self {
            self.row(
                "INSERT INTO payments (id, rental_id, amount, payment_date, method) VALUES (?1, ?2, ?3, '2024-05-04', 'Cash')",
                vec![SqlValue::Integer(id), SqlValue::Integer(rental_id), SqlValue::Real(amount)],
            )
        }

        pub fn expense(self, id: i64, car_id: i64, category: &str, amount: f64) -> Self {
            self.row(
                "INSERT INTO expenses (id, car_id, category, amount, expense_date) VALUES (?1, ?2, ?3, ?4, '2024-02-10')",
                vec![
                    SqlValue::Integer(id),
                    SqlValue::Integer(car_id),
                    text(category),
                    SqlValue::Real(amount),
                ],
            )
        }

        pub fn insurance(self, id: i64, car_id: i64, start_date: Option<&str>, expiry_date: &str) -> Self {
            self.row(
                "INSERT INTO insurance (id, car_id, provider, policy_number, start_date, expiry_date, premium) \
                 VALUES (?1, ?2, 'Acme Mutual', 'POL-1', ?3, ?4, 900.0)",
                vec![
                    SqlValue::Integer(id),
                    SqlValue::Integer(car_id),
                    optional_text(start_date),
                    text(expiry_date),
                ],
            )
        }

        pub fn registration(self, id: i64, car_id: i64, number: Option<&str>) -> Self {
            self.row(
                "INSERT INTO registration (id, car_id, registration_number, expiry_date, state, fee) \
                 VALUES (?1, ?2, ?3, '2025-01-31', 'NSW', 120.0)",
                vec![SqlValue::Integer(id), SqlValue::Integer(car_id), optional_text(number)],
            )
        }

        pub fn maintenance(self, id: i64, car_id: i64, description: &str) -> Self {
            self.row(
                "INSERT INTO maintenance (id, car_id, description, service_date, cost, status) \
                 VALUES (?1, ?2, ?3, '2024-03-15', 220.0, 'Done')",
                vec![SqlValue::Integer(id), SqlValue::Integer(car_id), text(description)],
            )
        }

        pub fn fine(self, id: i64, car_id: i64, rental_id: Option<i64>, paid: i64) -> Self {
            self.row(
                "INSERT INTO fines (id, car_id, rental_id, amount, violation_date, description, paid) \
                 VALUES (?1, ?2, ?3, 150.0, '2024-05-02', 'Speeding', ?4)",
                vec![
                    SqlValue::Integer(id),
                    SqlValue::Integer(car_id),
                    rental_id.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
                    SqlValue::Integer(paid),
                ],
            )
        }

        pub fn tracker(self, id: i64, car_id: Option<i64>, tracker_id: &str) -> Self {
            self.row(
                "INSERT INTO tracker (id, car_id, tracker_id, provider, sim_number, installed_date) \
                 VALUES (?1, ?2, ?3, 'TrackCo', '0400111222', '2023-11-20')",
                vec![
                    SqlValue::Integer(id),
                    car_id.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
                    text(tracker_id),
                ],
            )
        }

        /// Write the database to a scratch file and return its bytes.
        pub fn build(self) -> Vec<u8> {
            let scratch = tempfile::NamedTempFile::new().expect("scratch file");
            {
                let conn = Connection::open(scratch.path()).expect("open scratch database");
                conn.execute_batch(LEGACY_SCHEMA).expect("create legacy schema");
                for statement in &self.statements {
                    conn.execute_batch(statement).expect("fixture statement");
                }
                for (sql, values) in &self.rows {
                    conn.execute(sql, rusqlite::params_from_iter(values.iter()))
                        .expect("fixture row");
                }
            }
            std::fs::read(scratch.path()).expect("read scratch database")
        }
    }

    /// A valid SQLite file that contains no tables.
    pub fn empty_database_bytes() -> Vec<u8> {
        let scratch = tempfile::NamedTempFile::new().expect("scratch file");
        {
            let conn = Connection::open(scratch.path()).expect("open scratch database");
            conn.execute_batch("CREATE TABLE scratch (x INTEGER); DROP TABLE scratch;")
                .expect("touch schema");
        }
        std::fs::read(scratch.path()).expect("read scratch database")
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        const POSTGRES_IMAGE: (&str, &str) = ("postgres", "16-alpine");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral, migrated fleet database for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Use the server named by `TEST_DATABASE_URL`, or start a disposable
            /// Postgres container when it is unset.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => {
                        let options: PgConnectOptions = url.parse()?;
                        Self::provision(options, None).await
                    }
                    Err(_) => Self::new().await,
                }
            }

            /// Provision a fresh database inside a new Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let (name, tag) = POSTGRES_IMAGE;
                let container = GenericImage::new(name, tag)
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ))
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres")
                    .start()
                    .await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let options: PgConnectOptions =
                    format!("postgres://postgres:postgres@{host}:{port}/postgres").parse()?;
                Self::provision(options, Some(container)).await
            }

            async fn provision(
                base_options: PgConnectOptions,
                container: Option<ContainerAsync<GenericImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options = base_options.log_statements(LevelFilter::Off);
                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                sqlx::query(&format!("CREATE DATABASE \"{}\" TEMPLATE template0", database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await?;

                crate::db::run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections, drop the ephemeral database and stop the
            /// container if one was started.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                drop_database(self.admin_options.clone(), &self.database_name).await?;
                if let Some(container) = self.container.take() {
                    drop(container);
                }
                Ok(())
            }
        }

        async fn drop_database(admin_options: PgConnectOptions, database_name: &str) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;
            sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", database_name))
                .execute(&admin_pool)
                .await?;
            Ok(())
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database(admin_options, &db_name).await;
                        });
                    }
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        context: Option<ImportContext>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                context: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage the shared import state used by every handler.
        pub fn manage_context(mut self, context: ImportContext) -> Self {
            self.context = Some(context);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(context) = self.context {
                rocket = rocket.manage(context);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
