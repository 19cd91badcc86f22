/// [`Destination`](mediarelay_runtime::Destination) over the Bot API.
pub mod destination;
/// Bot API calls with retry on transient failures.
pub mod resilient;
