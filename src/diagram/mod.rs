//! Interactive P&ID view: camera and element offsets, schematic catalogue,
//! static SVG export.

pub mod editor;
pub mod schematic;
pub mod svg;

pub use editor::{DiagramEditor, Interaction, Key, PointerOutcome, Vec2};
pub use schematic::{detail, DetailLine, SchematicElement, ELEMENTS};
pub use svg::{export_svg, SCHEMATIC_SVG};
