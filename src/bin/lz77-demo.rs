use std::{
    env,
    error::Error,
    ffi::OsString,
    fs::File,
    io::{BufWriter, Write},
};

use jagpack::gpu::{end_addr, GPU_RAM_END, GPU_RAM_START, LZ77_ROUTINE};
use jagpack::*;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<OsString> = env::args_os().collect();

    if args.len() < 3 {
        println!("Usage: {} p|d|i input [output]", args[0].to_string_lossy());
        return Ok(());
    }

    let mode = &args[1];
    let inp_fn = &args[2];

    let inp = std::fs::read(inp_fn)?;
    let outp;

    match mode.to_str() {
        Some("p") => {
            let mut state = PackState::new();
            outp = state.pack_to_vec(&inp)?;
        }
        Some("d") => {
            outp = unpack_to_vec(&inp, None)?;
        }
        Some("i") => {
            match unpacked_len(&inp) {
                Some(n) => println!("packed {} bytes, unpacks to {}", inp.len(), n),
                None => println!("not a packed stream"),
            }
            if let Some(end) = end_addr(GPU_RAM_START) {
                println!(
                    "GPU routine: {} bytes, {:#08x}..{:#08x}, {} bytes free after it",
                    LZ77_ROUTINE.len(),
                    GPU_RAM_START,
                    end,
                    GPU_RAM_END.saturating_sub(end)
                );
            }
            return Ok(());
        }
        _ => {
            println!("Invalid mode {}", mode.to_string_lossy());
            return Ok(());
        }
    }

    let Some(outp_fn) = args.get(3) else {
        println!("Mode {} needs an output file", mode.to_string_lossy());
        return Ok(());
    };

    let mut outp_f = BufWriter::new(File::create(outp_fn)?);
    outp_f.write_all(&outp)?;
    outp_f.flush()?;

    Ok(())
}
