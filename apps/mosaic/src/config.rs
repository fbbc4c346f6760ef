use std::env;

use mosaic_layout::{DEFAULT_FIXED_BIG_ROW_HEIGHT, DEFAULT_PADDING_PIXEL};

/// Engine tunables. Everything layout-related must match what the server
/// assumes for row sizing (`row_item_count`).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub server_base: String,
    pub log_filter: String,
    pub fixed_big_row_height: f64,
    pub padding_pixel: f64,
    pub sub_row_height_scale: f64,
    pub limit_ratio: bool,
    /// Items per server row.
    pub row_item_count: usize,
    /// Items per metadata batch.
    pub batch_size: usize,
    /// How many recently requested batches are still worth applying.
    pub batch_window: usize,
    /// Extra pixels above and below the viewport treated as visible.
    pub buffer_height: f64,
    pub image_workers: usize,
    pub device_pixel_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_base: "http://127.0.0.1:5673".into(),
            log_filter: "info,mosaic_engine=debug".into(),
            fixed_big_row_height: DEFAULT_FIXED_BIG_ROW_HEIGHT,
            padding_pixel: DEFAULT_PADDING_PIXEL,
            sub_row_height_scale: 250.0,
            limit_ratio: false,
            row_item_count: 20,
            batch_size: 100,
            batch_window: 6,
            buffer_height: 1200.0,
            image_workers: default_image_workers(),
            device_pixel_ratio: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_base: env::var("MOSAIC_SERVER").unwrap_or(defaults.server_base),
            log_filter: env::var("RUST_LOG").unwrap_or(defaults.log_filter),
            fixed_big_row_height: parsed("MOSAIC_ROW_HEIGHT")
                .unwrap_or(defaults.fixed_big_row_height),
            padding_pixel: parsed("MOSAIC_PADDING").unwrap_or(defaults.padding_pixel),
            sub_row_height_scale: parsed("MOSAIC_SUB_ROW_HEIGHT")
                .unwrap_or(defaults.sub_row_height_scale),
            limit_ratio: env::var("MOSAIC_LIMIT_RATIO")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
                .unwrap_or(defaults.limit_ratio),
            row_item_count: parsed::<usize>("MOSAIC_ROW_ITEMS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.row_item_count),
            batch_size: parsed::<usize>("MOSAIC_BATCH_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.batch_size),
            batch_window: parsed::<usize>("MOSAIC_BATCH_WINDOW")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.batch_window),
            buffer_height: parsed("MOSAIC_BUFFER_HEIGHT").unwrap_or(defaults.buffer_height),
            image_workers: parsed::<usize>("MOSAIC_IMAGE_WORKERS")
                .map(|v| v.max(1))
                .unwrap_or(defaults.image_workers),
            device_pixel_ratio: parsed("MOSAIC_DPR").unwrap_or(defaults.device_pixel_ratio),
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

fn default_image_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.row_item_count, 20);
        assert_eq!(config.batch_window, 6);
        assert!(config.image_workers >= 1);
    }

    #[test]
    fn reads_overrides_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::set_var("MOSAIC_ROW_HEIGHT", "1800");
        env::set_var("MOSAIC_LIMIT_RATIO", "true");
        env::set_var("MOSAIC_IMAGE_WORKERS", "0");
        let config = EngineConfig::from_env();
        assert_eq!(config.fixed_big_row_height, 1800.0);
        assert!(config.limit_ratio);
        assert_eq!(config.image_workers, 1);
        env::remove_var("MOSAIC_ROW_HEIGHT");
        env::remove_var("MOSAIC_LIMIT_RATIO");
        env::remove_var("MOSAIC_IMAGE_WORKERS");
    }

    #[test]
    fn ignores_unparseable_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::set_var("MOSAIC_BATCH_SIZE", "lots");
        let config = EngineConfig::from_env();
        assert_eq!(config.batch_size, 100);
        env::remove_var("MOSAIC_BATCH_SIZE");
    }
}
