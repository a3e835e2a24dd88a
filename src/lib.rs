//! Crowbar - command-line archive manager
//!
//! Pries archives open with whatever tool is installed: rar/unrar, zip/unzip,
//! 7z or tar. Crowbar does no compression itself; it builds the right
//! command line, runs the tool, and parses its listing output.

pub mod format;
pub mod handlers;
pub mod process;
pub mod settings;
pub mod util;
