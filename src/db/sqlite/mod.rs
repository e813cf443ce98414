mod contentlets;

pub use contentlets::SqliteContentletRepo;
