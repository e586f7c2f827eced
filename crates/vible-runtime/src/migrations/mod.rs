mod runner;

pub use runner::{builtin_migrations, Migration, MigrationRunner};
