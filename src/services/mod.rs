pub mod monitoring;
pub mod optimization;
pub mod prices;
pub mod weather;

pub use monitoring::{Monitor, MonitoringRules};
pub use optimization::{recommend, Recommendation};
pub use prices::{PriceClient, PricePoint};
pub use weather::{WeatherClient, WeatherReport};
