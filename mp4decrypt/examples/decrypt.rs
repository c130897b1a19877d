use mp4decrypt::{Error, Mp4Decrypter};
use std::env;

fn main() -> Result<(), Error> {
    let args = env::args().skip(1).collect::<Vec<_>>();

    let (input, output, init) = match args.as_slice() {
        [input, output] => (input, output, None),
        [input, output, init] => (input, output, Some(init)),
        _ => {
            eprintln!("usage: decrypt <INPUT> <OUTPUT> [INIT]");
            return Ok(());
        }
    };

    Mp4Decrypter::new()
        .key(
            "eb676abbcb345e96bbcf616630f1a3da",
            "100b6c20940f779a4589152b57d2dacb",
        )?
        .build()?
        .decrypt_file(input, output, init)?;

    Ok(())
}
