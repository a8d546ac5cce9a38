use crate::amqp::configuration::RabbitMqSettings;
use crate::amqp::transport::TransportFactory;
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;

#[derive(Clone)]
/// Everything required to dial a RabbitMq broker, apart from its address.
///
/// The address is supplied on every call to [`TransportFactory::connect`], so the same
/// factory can be shared by processors talking to different brokers.
pub struct ConnectionFactory {
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
    /// TLS configuration for the connection to RabbitMq.
    /// If `None`, the connection will not be encrypted.
    tls: Option<Arc<Tls>>,
}

#[derive(Clone)]
struct Tls {
    connector: NativeTlsConnector,
    /// Falls back to the host of the address we are dialing when `None`.
    domain_name: Option<String>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self {
            connection_timeout: std::time::Duration::from_secs(10),
            tls: None,
        }
    }
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// It allows you to customize the TLS configuration.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let tls = settings
            .tls
            .as_ref()
            .map::<Result<Tls, anyhow::Error>, _>(|tls_settings| {
                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }
                let connector = connector_builder
                    .build()
                    .context("Failed to build the TLS connector for RabbitMQ.")?;
                Ok(Tls {
                    domain_name: tls_settings.domain.clone(),
                    connector,
                })
            })
            .transpose()?;
        let connection_timeout = settings
            .connection_timeout()
            .unwrap_or_else(|| std::time::Duration::from_secs(10));
        Ok(Self {
            connection_timeout,
            tls: tls.map(Arc::new),
        })
    }

    /// Replaces the TLS Connector for the connection factory.
    ///
    /// The expected domain for the server certificate is the host of the address we connect to.
    pub fn set_tls_connector(&mut self, connector: NativeTlsConnector) {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name: None,
        }));
    }

    /// Replaces the TLS Connector for the connection factory, along with the expected domain name for the certificate
    pub fn set_tls_connector_with_domain(
        &mut self,
        connector: NativeTlsConnector,
        domain_name: String,
    ) {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name: Some(domain_name),
        }));
    }

    /// Create a new connection to the RabbitMq broker at `address`.
    ///
    /// It establishes an encrypted connection if `self.tls` is `Some`.
    /// It establishes an unencrypted connection if `self.tls` is `None`.
    #[tracing::instrument(name = "rabbitmq_connect", skip_all)]
    pub async fn new_connection(&self, address: &str) -> Result<lapin::Connection, anyhow::Error> {
        let uri: AMQPUri = address
            .parse()
            .map_err(anyhow::Error::msg)
            .context("Failed to parse the RabbitMQ address.")?;
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = timeout(self.connection_timeout, async {
            match &self.tls {
                None => self.connect_without_tls(uri, properties).await,
                Some(tls) => self.connect_with_tls(uri, properties, Arc::clone(tls)).await,
            }
        })
        .await
        .context("Timed out while trying to connect to RabbitMQ.")??;
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }

    /// Establish a new unencrypted connection to a RabbitMq broker.
    async fn connect_without_tls(
        &self,
        uri: AMQPUri,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, anyhow::Error> {
        lapin::Connection::connect_uri(uri, properties)
            .await
            .context("Failed to connect to RabbitMQ.")
    }

    /// Establish a new TLS connection to a RabbitMq broker.
    async fn connect_with_tls(
        &self,
        uri: AMQPUri,
        properties: ConnectionProperties,
        tls_configuration: Arc<Tls>,
    ) -> Result<lapin::Connection, anyhow::Error> {
        let domain_name = tls_configuration
            .domain_name
            .clone()
            .unwrap_or_else(|| uri.authority.host.clone());
        lapin::Connection::connector(
            uri,
            Box::new(move |uri| {
                // First establish a plain TCP connection using the AMQP protocol
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri
                    .connect()
                    // Then perform a TLS handshake with custom settings
                    // including customisation of the expected domain for the server certificate
                    .and_then(|tcp| tcp.into_native_tls(&tls_configuration.connector, &domain_name))
            }),
            properties,
        )
        .await
        .context("Failed to establish a TLS connection to RabbitMQ.")
    }
}

#[async_trait::async_trait]
impl TransportFactory for ConnectionFactory {
    type Connection = lapin::Connection;

    async fn connect(&self, address: &str) -> Result<Self::Connection, anyhow::Error> {
        self.new_connection(address).await
    }
}
