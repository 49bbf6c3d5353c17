// Local crates
use crate::buffer_batcher::models::Batch;
use crate::shipper::sink::{DeliveryError, DeliveryProgress, Sink};

// External crates
use tokio::io::{AsyncWriteExt, stdout};

/// `Sink` that prints every record as a JSON line on stdout. Used for dry
/// runs, where no stream is contacted.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

/// Render a batch as newline-delimited `{"data", "partitionKey"}` objects.
pub fn render(batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
    let mut out = Vec::with_capacity(batch.len() * 128);
    for record in batch.records() {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

impl Sink for StdoutSink {
    async fn deliver(&self, batch: &Batch, progress: &DeliveryProgress) -> Result<(), DeliveryError> {
        let rendered = render(batch)?;
        let mut out = stdout();
        out.write_all(&rendered).await?;
        out.flush().await?;
        progress.record(batch.len());
        Ok(())
    }
}
