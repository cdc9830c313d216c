//! A minimal Avro binary codec: the primitive wire encodings and the object
//! container file format, exactly as the Avro 1.x specification defines them.
//!
//! Manifests and manifest lists are Avro container files; their bytes must be
//! readable by every other Iceberg implementation, so this module implements
//! the encoding directly rather than routing through a general-purpose Avro
//! library whose container framing and schema resolution we would then have
//! to pin. Only the features Iceberg manifests use are covered: the `null`
//! codec, single-schema containers, and the primitive/union/array/map
//! encodings.

mod container;
mod decode;
mod encode;

pub use container::{ContainerReader, ContainerWriter, AVRO_MAGIC, SYNC_MARKER_LEN};
pub use decode::Decoder;
pub use encode::Encoder;
