// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use std::error::Error;

/// Install the process-wide rustls crypto provider. Only the first call
/// installs; later calls are no-ops.
pub fn init_crypto_provider() -> Result<(), Box<dyn Error + Send + Sync>> {
    if CryptoProvider::get_default().is_none() {
        return match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(_) => Ok(()),
            Err(e) => Err(format!("failed to initialize crypto provider: {:?}", e).into()),
        };
    }
    Ok(())
}
