mod app;

pub use app::add_routes;
pub use app::index;
