//! `sign-commit`: front end for authorizing a push of the currently checked-out branch (spec
//! §6). Intended to be wired in as a repo's `gpg.program` so `git commit -S` invokes it in
//! place of GnuPG — the "signature" a contributor's commit carries is really a push token
//! authorizing the branch it's about to be pushed on, not a signature over the commit itself.
//!
//! Like a real `gpg.program`, the signature text goes to stdout, where git folds it into the
//! commit's `gpgsig` header: that's what lets [`decentra_git::validator`] recover the same
//! `TxDetail` straight from the pushed commit's bytes and compare it against the one the pusher
//! authenticates with over HTTP via the remote URL this binary also updates.

use decentra_git::cli;
use decentra_git::internal::object::commit::Commit;
use decentra_git::token::{self, TxDetail};

fn main() {
    if let Err(e) = run() {
        eprintln!("sign-commit: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = cli::parse_args()?;

    if args.reset_tokens {
        cli::update_remote_urls(&args.remote, None)?;
        eprintln!("sign-commit: cleared push tokens from remote `{}`", args.remote);
        return Ok(());
    }

    let key = cli::load_key(&args.push_key_id, args.passphrase.as_deref())?;
    let reference = cli::current_branch_ref()?;

    let detail = TxDetail::new(args.push_key_id.clone(), args.nonce, args.fee.clone(), reference, None, None);
    let signed = token::sign_tx_detail(&key, detail);
    let push_token = token::encode_push_token(&signed);

    cli::update_remote_urls(&args.remote, Some(&push_token))?;
    eprintln!("{}", cli::last_push_token_env_line(&push_token));

    // git reads the signature off stdout and folds it into the commit's `gpgsig` header itself.
    print!("{}", Commit::push_token_signature(&push_token));

    Ok(())
}
