use budget_events_config::{BrokerLogLevel, KafkaConfig};
use budget_events_error::{GatewayError, GatewayResult};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use tracing::info;

/// Build the `ClientConfig` shared by the producer, consumer and admin
/// clients.
///
/// It handles:
/// - Bootstrap servers, client id and librdkafka log level
/// - TLS from inline PEM material or a CA file location
/// - SASL credentials, combined with TLS as `sasl_ssl` when both are set
///
/// # Arguments
/// * `config` - Kafka connection settings
///
/// # Returns
/// * The configured `ClientConfig`, or a config error when no broker is set
pub fn create_client_config(config: &KafkaConfig) -> GatewayResult<ClientConfig> {
    if !config.is_enabled() {
        return Err(GatewayError::Config(
            "cannot build a Kafka client without brokers".into(),
        ));
    }

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("client.id", &config.client_id)
        .set_log_level(rdkafka_log_level(config.log_level));

    if let Some(tls) = &config.tls {
        info!("Enabling SSL/TLS for Kafka connection");
        if let Some(ca) = &tls.ca_pem {
            client_config.set("ssl.ca.pem", ca);
        }
        if let Some(location) = &tls.ca_location {
            client_config.set("ssl.ca.location", location);
        }
        if let Some(cert) = &tls.cert_pem {
            client_config.set("ssl.certificate.pem", cert);
        }
        if let Some(key) = &tls.key_pem {
            client_config.set("ssl.key.pem", key);
        }
    }

    if let Some(sasl) = &config.sasl {
        info!(sasl_mechanism = %sasl.mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", &sasl.mechanism)
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
    }

    client_config.set(
        "security.protocol",
        security_protocol(config.tls.is_some(), config.sasl.is_some()),
    );

    Ok(client_config)
}

fn security_protocol(tls: bool, sasl: bool) -> &'static str {
    match (tls, sasl) {
        (true, true) => "sasl_ssl",
        (false, true) => "sasl_plaintext",
        (true, false) => "ssl",
        (false, false) => "plaintext",
    }
}

fn rdkafka_log_level(level: BrokerLogLevel) -> RDKafkaLogLevel {
    match level {
        // librdkafka has no "off"; emergency is the quietest level
        BrokerLogLevel::Nothing => RDKafkaLogLevel::Emerg,
        BrokerLogLevel::Error => RDKafkaLogLevel::Error,
        BrokerLogLevel::Warn => RDKafkaLogLevel::Warning,
        BrokerLogLevel::Info => RDKafkaLogLevel::Info,
        BrokerLogLevel::Debug => RDKafkaLogLevel::Debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_events_config::{SaslCredentials, TlsMaterial};

    #[test]
    fn test_plaintext_config() {
        let config = KafkaConfig::with_brokers("kafka://b1:9092, b2:9092");
        let client = create_client_config(&config).unwrap();

        assert_eq!(client.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(client.get("client.id"), Some("budget-manager"));
        assert_eq!(client.get("security.protocol"), Some("plaintext"));
    }

    #[test]
    fn test_sasl_over_tls() {
        let mut config = KafkaConfig::with_brokers("b1:9092");
        config.tls = Some(TlsMaterial {
            ca_pem: Some("-----BEGIN CERTIFICATE-----".into()),
            ..TlsMaterial::default()
        });
        config.sasl = Some(SaslCredentials {
            mechanism: "SCRAM-SHA-512".into(),
            username: "svc".into(),
            password: "secret".into(),
        });

        let client = create_client_config(&config).unwrap();
        assert_eq!(client.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert!(client.get("ssl.ca.pem").is_some());
        assert!(client.get("ssl.certificate.pem").is_none());
    }

    #[test]
    fn test_disabled_config_is_rejected() {
        assert!(create_client_config(&KafkaConfig::disabled()).is_err());
    }
}
