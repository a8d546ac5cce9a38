use crate::amqp::transport::{Connection, TransportFactory};
use crate::consumers::ProcessorError;
use tracing::warn;
use url::Url;

/// A connection to a broker together with the single channel opened over it.
///
/// `BrokerConnection` owns both resources: they are released by [`BrokerConnection::close`],
/// which consumes the value, so a connection can't be closed twice.
pub struct BrokerConnection<C: Connection> {
    connection: C,
    channel: C::Channel,
}

impl<C: Connection> BrokerConnection<C> {
    /// Dial the broker at `address` and open a channel over the new connection.
    ///
    /// Fails with [`ProcessorError::Connection`] if the broker can't be reached and with
    /// [`ProcessorError::Channel`] if the channel can't be allocated. In the latter case the
    /// connection is closed before returning.
    #[tracing::instrument(
        name = "broker_connection_open",
        skip_all,
        fields(address = %redact_address(address))
    )]
    pub async fn open<F>(factory: &F, address: &str) -> Result<Self, ProcessorError>
    where
        F: TransportFactory<Connection = C>,
    {
        let connection =
            factory
                .connect(address)
                .await
                .map_err(|source| ProcessorError::Connection {
                    address: redact_address(address),
                    source,
                })?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(source) => {
                if let Err(e) = connection.close().await {
                    warn!(error = ?e, "Failed to close the connection after channel allocation failed");
                }
                return Err(ProcessorError::Channel {
                    address: redact_address(address),
                    source,
                });
            }
        };
        Ok(Self {
            connection,
            channel,
        })
    }

    /// The channel opened over this connection.
    pub fn channel(&self) -> &C::Channel {
        &self.channel
    }

    /// Close the connection, and with it the channel.
    ///
    /// A failure is reported to the caller, we never retry.
    pub async fn close(self) -> Result<(), anyhow::Error> {
        self.connection.close().await
    }
}

/// Strip credentials from a broker address, so that it can be logged or attached to errors.
///
/// Addresses that can't be parsed lose everything between the scheme and the last `@`.
pub fn redact_address(address: &str) -> String {
    match Url::parse(address) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            // Only fails for cannot-be-a-base urls, which carry no credentials anyway.
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.to_string()
        }
        Ok(_) => address.to_owned(),
        Err(_) => strip_userinfo(address),
    }
}

fn strip_userinfo(address: &str) -> String {
    let Some(at) = address.rfind('@') else {
        return address.to_owned();
    };
    let start = address.find("://").map_or(0, |scheme_end| scheme_end + 3);
    if start > at {
        return address.to_owned();
    }
    format!("{}{}", &address[..start], &address[at + 1..])
}
