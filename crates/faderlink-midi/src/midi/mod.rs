//! MIDI transport
//!
//! Port discovery, the input callback, and the LED output over midir.

pub mod connection;
pub mod input;
pub mod output;

pub use connection::{connect_output, find_input_port, list_input_ports, list_output_ports, MidiConnectionError};
pub use input::{ControllerEvent, MidiInputHandler};
pub use output::{led_message, MidiLedOutput};
