//! `sign-tag`: front end for authorizing a push of an annotated tag (spec §6), wired in as a
//! repo's `gpg.program` for `git tag -s <name>`. The tag name git invokes us with is taken as a
//! trailing positional argument, the same way `gpg.program` receives the object being signed.
//!
//! [`decentra_git::validator`] authorizes a tag push against the `TxDetail` already embedded in
//! the commit the tag points at (an annotated tag never carries its own push token), so the
//! signature this binary writes to stdout only needs to satisfy git's own "did signing succeed"
//! expectation for `git tag -s` — the remote-URL update is what actually matters for the push.

use decentra_git::cli;
use decentra_git::internal::object::commit::Commit;
use decentra_git::token::{self, TxDetail};

fn main() {
    if let Err(e) = run() {
        eprintln!("sign-tag: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = cli::parse_args()?;

    if args.reset_tokens {
        cli::update_remote_urls(&args.remote, None)?;
        eprintln!("sign-tag: cleared push tokens from remote `{}`", args.remote);
        return Ok(());
    }

    let tag_name = args
        .positional
        .first()
        .ok_or_else(|| "missing tag name argument".to_string())?;
    let reference = format!("refs/tags/{tag_name}");

    let key = cli::load_key(&args.push_key_id, args.passphrase.as_deref())?;

    let detail = TxDetail::new(args.push_key_id.clone(), args.nonce, args.fee.clone(), reference, None, None);
    let signed = token::sign_tx_detail(&key, detail);
    let push_token = token::encode_push_token(&signed);

    cli::update_remote_urls(&args.remote, Some(&push_token))?;
    eprintln!("{}", cli::last_push_token_env_line(&push_token));

    print!("{}", Commit::push_token_signature(&push_token));

    Ok(())
}
