use std::fmt::Write;
use std::path::PathBuf;
use std::{env, fs};

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    // NUC472 GPIO ports PA..PI, 16 pins each. Every port has its own NVIC line (GPA_IRQn..GPI_IRQn).
    let gpio_ports: &[char] = &['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];
    let pins_per_port: u8 = 16;

    // Generate singletons
    let mut singletons: Vec<String> = Vec::new();

    for port in gpio_ports {
        for pin_num in 0..pins_per_port {
            singletons.push(format!("P{}{}", port, pin_num));
        }
    }

    // _generated.rs
    let mut g = TokenStream::new();

    let singleton_tokens: Vec<_> = singletons.iter().map(|s| format_ident!("{}", s)).collect();

    g.extend(quote! {
        crate::peripherals_definition!(#(#singleton_tokens),*);
    });

    g.extend(quote! {
        crate::peripherals_struct!(#(#singleton_tokens),*);
    });

    // _macros.rs
    let mut m = String::new();

    let mut pins_table: Vec<Vec<String>> = Vec::new();
    for (port_num, port) in gpio_ports.iter().enumerate() {
        for pin_num in 0..pins_per_port {
            pins_table.push(vec![
                format!("P{}{}", port, pin_num),
                port_num.to_string(),
                pin_num.to_string(),
            ]);
        }
    }

    make_table(&mut m, "foreach_pin", &pins_table);

    let ports_table: Vec<Vec<String>> = gpio_ports
        .iter()
        .enumerate()
        .map(|(port_num, port)| vec![format!("GP{}", port), port_num.to_string()])
        .collect();

    make_table(&mut m, "foreach_port", &ports_table);

    // Write generated files
    let out_file = out_dir.join("_generated.rs").to_string_lossy().to_string();
    fs::write(out_file, g.to_string()).unwrap();

    let out_file = out_dir.join("_macros.rs").to_string_lossy().to_string();
    fs::write(out_file, m).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}

fn make_table(out: &mut String, name: &str, data: &Vec<Vec<String>>) {
    write!(
        out,
        "#[allow(unused)]
macro_rules! {} {{
    ($($pat:tt => $code:tt;)*) => {{
        macro_rules! __{}_inner {{
            $(($pat) => $code;)*
            ($_:tt) => {{}}
        }}
",
        name, name
    )
    .unwrap();

    for row in data {
        writeln!(out, "        __{}_inner!(({}));", name, row.join(",")).unwrap();
    }

    write!(
        out,
        "    }};
}}"
    )
    .unwrap();
}
