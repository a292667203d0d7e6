//! `sign-note`: front end for authorizing a push to a `refs/notes/*` reference (spec §6). Unlike
//! commits and tags, a note's [`TxDetail`] carries the ref's current head so the receive-pack
//! mediator can detect a concurrent note update racing this one.
//!
//! There's no `gpg.program` hook for notes, and [`decentra_git::validator`] reads the push token
//! straight off the note blob's content rather than out of an embedded header — so unlike the
//! other two binaries, stdout here is the bare encoded token, meant to be captured straight into
//! the note body (e.g. `git notes add -m "$(sign-note ...)"`).

use decentra_git::cli;
use decentra_git::token::{self, TxDetail};

fn main() {
    if let Err(e) = run() {
        eprintln!("sign-note: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = cli::parse_args()?;

    if args.reset_tokens {
        cli::update_remote_urls(&args.remote, None)?;
        eprintln!("sign-note: cleared push tokens from remote `{}`", args.remote);
        return Ok(());
    }

    let notes_ref = args
        .positional
        .first()
        .cloned()
        .unwrap_or_else(|| "refs/notes/commits".to_string());
    let head = cli::ref_head(&notes_ref);

    let key = cli::load_key(&args.push_key_id, args.passphrase.as_deref())?;

    let detail = TxDetail::new(args.push_key_id.clone(), args.nonce, args.fee.clone(), notes_ref, head, None);
    let signed = token::sign_tx_detail(&key, detail);
    let push_token = token::encode_push_token(&signed);

    cli::update_remote_urls(&args.remote, Some(&push_token))?;
    eprintln!("{}", cli::last_push_token_env_line(&push_token));

    println!("{push_token}");

    Ok(())
}
