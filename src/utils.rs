use std::path::Path;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Latin plate alphabet of the CTC recognizer, in class index order. Class
/// indices past the end are the blank.
pub const LATIN_CHARS: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H',
    'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

// row major [steps, classes] output, index of the best class per step
pub fn argmax_in_axis0(input: &[f32], classes: usize) -> Vec<usize> {
    input.chunks(classes).map(|v: &[f32]| {
        let mut max = v[0];
        let mut index = 0;
        v.iter().enumerate().for_each(|(i, v_in_v)| {
            if *v_in_v >= max {
                max = *v_in_v;
                index = i;
            }
        });
        index
    }).collect()
}

/// Best path decoding of a CTC output: take the best class per step, collapse
/// repeats, drop blanks. The confidence is the mean probability of the kept
/// steps, 0 when nothing is kept.
pub fn ctc_greedy_decode(probs: &[f32], classes: usize, charset: &[char]) -> (String, f32) {
    if classes == 0 {
        return (String::new(), 0.0);
    }
    let argmax = argmax_in_axis0(probs, classes);
    let (res, confidence) = argmax.iter().enumerate().filter(|(i, v)| {
        **v < charset.len() && (*i == 0 || **v != argmax[i - 1])
    }).fold((String::new(), 0.0), |(mut res, confidence), (i, v)| {
        res.push(charset[*v]);
        (res, confidence + probs[i * classes + v])
    });
    let kept = res.chars().count();
    if kept == 0 {
        return (res, 0.0);
    }
    (res, confidence / kept as f32)
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// File stem used to name artifacts, `image` when the path has none.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}


#[cfg(test)]
mod test {

    use std::path::Path;

    use super::*;

    #[test]
    fn argmax_per_row() {
        let probs = [0.1, 0.7, 0.2, 0.5, 0.2, 0.3];
        assert_eq!(argmax_in_axis0(&probs, 3), vec![1, 0]);
    }

    #[test]
    fn ctc_collapses_repeats_and_blanks() {
        let charset = ['A', 'B'];
        // classes: A, B, blank
        let probs = [
            0.9, 0.05, 0.05,
            0.8, 0.1, 0.1,
            0.1, 0.1, 0.8,
            0.7, 0.2, 0.1,
            0.1, 0.6, 0.3,
        ];
        let (text, confidence) = ctc_greedy_decode(&probs, 3, &charset);
        assert_eq!(text, "AAB");
        assert!((confidence - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn ctc_all_blank_is_empty() {
        let probs = [0.1, 0.9, 0.2, 0.8];
        assert_eq!(ctc_greedy_decode(&probs, 2, &['A']), (String::new(), 0.0));
    }

    #[test]
    fn image_files_by_extension() {
        assert!(is_image_file(Path::new("data/input/car.JPG")));
        assert!(is_image_file(Path::new("a.bmp")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("README")));
        assert_eq!(file_stem(Path::new("data/input/car 1.jpeg")), "car 1");
    }
}
