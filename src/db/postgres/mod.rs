mod contentlets;

pub use contentlets::PostgresContentletRepo;
