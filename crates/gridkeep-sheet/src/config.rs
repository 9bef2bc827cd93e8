//! Configuration for a grid document.

/// Configuration for a grid document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetConfig {
    /// Rows created when a fresh document is seeded.
    pub initial_rows: usize,
    /// Columns created when a fresh document is seeded.
    pub initial_cols: usize,
    /// Label given to every new column.
    pub default_label: String,
    /// Maximum number of reversible transactions kept per axis.
    pub max_history: usize,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            initial_rows: 3,
            initial_cols: 3,
            default_label: "XYZ".to_string(),
            max_history: 1000,
        }
    }
}

/// Builder for sheet configuration.
pub struct SheetConfigBuilder {
    config: SheetConfig,
}

impl SheetConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SheetConfig::default(),
        }
    }

    pub fn initial_rows(mut self, rows: usize) -> Self {
        self.config.initial_rows = rows;
        self
    }

    pub fn initial_cols(mut self, cols: usize) -> Self {
        self.config.initial_cols = cols;
        self
    }

    pub fn default_label(mut self, label: impl Into<String>) -> Self {
        self.config.default_label = label.into();
        self
    }

    pub fn max_history(mut self, max: usize) -> Self {
        self.config.max_history = max;
        self
    }

    pub fn build(self) -> SheetConfig {
        self.config
    }
}

impl Default for SheetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SheetConfig::default();
        assert_eq!(config.initial_rows, 3);
        assert_eq!(config.initial_cols, 3);
        assert_eq!(config.default_label, "XYZ");
    }

    #[test]
    fn test_config_builder() {
        let config = SheetConfigBuilder::new()
            .initial_rows(5)
            .initial_cols(2)
            .default_label("Untitled")
            .max_history(10)
            .build();

        assert_eq!(config.initial_rows, 5);
        assert_eq!(config.initial_cols, 2);
        assert_eq!(config.default_label, "Untitled");
        assert_eq!(config.max_history, 10);
    }
}
