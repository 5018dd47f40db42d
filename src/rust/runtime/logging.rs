// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Constants
//==============================================================================

/// Log specification used when RUST_LOG is not set: only warnings and errors
/// from this crate.
const DEFAULT_LOG_SPEC: &str = "catfabric=warn";

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The level comes from the RUST_LOG
/// environment variable, falling back to [DEFAULT_LOG_SPEC].
pub fn initialize() {
    INIT_LOG.call_once(|| {
        Logger::try_with_env_or_str(DEFAULT_LOG_SPEC).unwrap().start().unwrap();
    });
}
