use envconfig::Envconfig;

pub use common_kafka::config::KafkaConfig;

/// Process level settings. Topics and the broker address live in the flatteners config file.
#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(
        from = "FLATTENERS_CONFIG_PATH",
        default = "./config/flattenersConfig.json"
    )]
    pub flatteners_config_path: String,

    #[envconfig(from = "LOG_CONFIG_PATH", default = "./config/logConfig.json")]
    pub log_config_path: String,

    #[envconfig(from = "KAFKA_GROUP_ID", default = "my-consumer-group")]
    pub kafka_group_id: String,

    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3311")]
    pub bind_port: u16,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}
