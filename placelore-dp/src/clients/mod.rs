//! Clients for external collaborators
//!
//! The pipeline consumes the AI extraction service and the maps/places
//! platform through narrow trait interfaces; the HTTP implementations here
//! are the only code that knows about their wire formats.

pub mod maps;
pub mod oracle;

pub use maps::{MapsError, MapsPlatform, HttpMapsClient, RawPlaceResult};
pub use oracle::{
    ConversationTurn, ExtractedFields, ExtractionOracle, ExtractionResponse, HttpOracleClient,
    OracleError, SuggestedAction, TurnRole,
};
