use image::GenericImageView;

use std::error::Error;
use std::env::args;
use std::process;

use lpr_plates::image_process::ImageConditioner;
use lpr_plates::text;

// Condition one cropped plate and write the binary image next to it:
// cargo run --example condition -- plate.jpg [RAW TEXT]
fn main() -> Result<(), Box<dyn Error>> {
    let mut args = args();
    args.next();
    let path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("didn't get a plate image from args");
            process::exit(1);
        }
    };

    let img = image::open(&path)?;
    let conditioned = ImageConditioner::new().condition(&img)?;
    let (width, height) = img.dimensions();
    let (out_width, out_height) = conditioned.dimensions();
    println!("{}x{} -> {}x{}, scale {:.3}, otsu level {}",
        width, height, out_width, out_height, conditioned.scale(), conditioned.otsu_level());

    let out_path = format!("{}.conditioned.png", path);
    conditioned.image().save(&out_path)?;
    println!("saved {}", out_path);

    if let Some(raw) = args.next() {
        println!("{:?} -> {:?}", raw, text::normalize(&raw));
    }
    Ok(())
}
