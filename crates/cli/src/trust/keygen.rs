use std::process;

use serde_json::json;

use scorebook_cluster::identity::{
    generate_signing_key, key_fingerprint, public_key_b64, write_keypair,
};

use crate::{print_json, report_error, OutputFormat};

/// Generate an ed25519 node keypair and write `<prefix>.secret` and
/// `<prefix>.pub`.
///
/// The public key is what other nodes list in `trusted_keys`.
pub fn cmd_keygen(output_prefix: &str, output: OutputFormat, quiet: bool) {
    let signing_key = generate_signing_key();
    let (secret_path, pub_path) = match write_keypair(&signing_key, output_prefix) {
        Ok(paths) => paths,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let verifying_key = signing_key.verifying_key();
    match output {
        OutputFormat::Json => print_json(&json!({
            "secret": secret_path.display().to_string(),
            "public": pub_path.display().to_string(),
            "publicKey": public_key_b64(&verifying_key),
            "fingerprint": key_fingerprint(&verifying_key),
        })),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "Generated ed25519 keypair: {}, {}",
                    secret_path.display(),
                    pub_path.display()
                );
                println!("fingerprint: {}", key_fingerprint(&verifying_key));
            }
        }
    }
}
